use super::{PositionEstimate, PositionStrategy, StrategyKind};
use crate::geometry::{Rect, WorldPoint};
use crate::large_map::LargeMapInfo;
use crate::minimap::MiniMapInfo;
use tracing::debug;

/// Triangulate from landmarks recognised on the minimap.
///
/// Each detection paired with a same-template landmark on the large map
/// votes for one player position; the largest cluster of votes wins.
pub struct LandmarkStrategy {
    cluster_radius: f64,
}

struct Vote {
    world: WorldPoint,
    /// Large-map pixels per minimap pixel.
    scale: f64,
}

impl LandmarkStrategy {
    pub fn new(cluster_radius: f64) -> Self {
        Self { cluster_radius }
    }

    fn votes(&self, minimap: &MiniMapInfo, map: &LargeMapInfo, rect: Option<Rect>) -> Vec<Vote> {
        let center = minimap.center();
        let mut votes = Vec::new();
        for (template_id, detections) in &minimap.landmarks {
            let on_map: Vec<_> = map
                .landmarks
                .iter()
                .filter(|l| &l.template_id == template_id)
                .filter(|l| rect.map(|r| r.contains(&l.world)).unwrap_or(true))
                .collect();
            for det in detections.iter() {
                let det_scale = det.scale.unwrap_or(1.0);
                if det_scale <= 0.0 {
                    continue;
                }
                let (dx, dy) = det.center();
                for landmark in &on_map {
                    votes.push(Vote {
                        world: WorldPoint::new(
                            landmark.world.x - (dx - center.x) / det_scale,
                            landmark.world.y - (dy - center.y) / det_scale,
                        ),
                        scale: 1.0 / det_scale,
                    });
                }
            }
        }
        votes
    }
}

impl PositionStrategy for LandmarkStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Landmark
    }

    fn try_estimate(
        &self,
        minimap: &MiniMapInfo,
        map: &LargeMapInfo,
        rect: Option<Rect>,
        _running: bool,
    ) -> Option<PositionEstimate> {
        let votes = self.votes(minimap, map, rect);
        if votes.is_empty() {
            return None;
        }

        let support: Vec<usize> = votes
            .iter()
            .map(|v| {
                votes
                    .iter()
                    .filter(|o| o.world.distance(&v.world) <= self.cluster_radius)
                    .count()
            })
            .collect();
        let best = *support.iter().max()?;
        let seeds: Vec<&Vote> = votes
            .iter()
            .zip(support.iter())
            .filter(|(_, s)| **s == best)
            .map(|(v, _)| v)
            .collect();
        let seed = seeds[0];
        if seeds
            .iter()
            .any(|s| s.world.distance(&seed.world) > self.cluster_radius)
        {
            debug!("landmark votes split into {} equal clusters", seeds.len());
            return None;
        }

        let members: Vec<&Vote> = votes
            .iter()
            .filter(|v| v.world.distance(&seed.world) <= self.cluster_radius)
            .collect();
        let n = members.len() as f64;
        let world = WorldPoint::new(
            members.iter().map(|v| v.world.x).sum::<f64>() / n,
            members.iter().map(|v| v.world.y).sum::<f64>() / n,
        );
        let scale = members.iter().map(|v| v.scale).sum::<f64>() / n;

        Some(PositionEstimate {
            confidence: n,
            world,
            effective_width: minimap.width() as f64 * scale,
            effective_height: minimap.height() as f64 * scale,
            scale,
            strategy: StrategyKind::Landmark,
        })
    }
}
