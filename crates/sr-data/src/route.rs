//! Routes: ordered movement/interaction scripts anchored at a special point.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::AtlasStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitKind {
    /// Wait until the screen is back in the normal world view.
    InWorld,
    /// Plain wait.
    Seconds,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RouteOp {
    Move {
        x: f64,
        y: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        floor: Option<i32>,
    },
    /// Attack whatever is around the current position.
    Patrol,
    /// Press interact on the prompt slot. `text` only labels the step in
    /// logs; no prompt text is matched.
    Interact {
        text: String,
    },
    Wait {
        kind: WaitKind,
        timeout_secs: f64,
    },
    MarkVisited,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    pub name: String,
    pub region_id: String,
    /// Special point the route starts from (usually a transport point).
    pub start: String,
    pub ops: Vec<RouteOp>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RouteError {
    #[error("unknown region {0}")]
    UnknownRegion(String),
    #[error("unknown start point {0}")]
    UnknownStart(String),
    #[error("start point {point} is not in region {region}")]
    StartOutsideRegion { point: String, region: String },
    #[error("op #{index}: ({x}, {y}) is outside region {region}")]
    OutOfBounds {
        index: usize,
        x: f64,
        y: f64,
        region: String,
    },
    #[error("op #{index}: no floor {floor} next to region {region}")]
    UnknownFloor {
        index: usize,
        floor: i32,
        region: String,
    },
    #[error("op #{index}: wait timeout must be positive")]
    BadTimeout { index: usize },
}

impl Route {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let route: Route = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(route)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("serialize route")?;
        std::fs::write(path, json).with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }

    /// Iterate the move targets as `(x, y, floor)`.
    pub fn moves(&self) -> impl Iterator<Item = (f64, f64, Option<i32>)> + '_ {
        self.ops.iter().filter_map(|op| match op {
            RouteOp::Move { x, y, floor } => Some((*x, *y, *floor)),
            _ => None,
        })
    }

    /// Region ids this route touches, in order of first use.
    pub fn region_ids(&self, atlas: &dyn AtlasStore) -> Vec<String> {
        let mut ids = vec![self.region_id.clone()];
        let Some(mut current) = atlas.region(&self.region_id) else {
            return ids;
        };
        for (_, _, floor) in self.moves() {
            if let Some(floor) = floor {
                if floor != current.floor {
                    if let Some(next) = atlas.region_on_floor(current, floor) {
                        if !ids.contains(&next.id) {
                            ids.push(next.id.clone());
                        }
                        current = next;
                    }
                }
            }
        }
        ids
    }

    /// Check that every move stays inside the current region and that the
    /// region only changes through an explicit floor change.
    pub fn validate(&self, atlas: &dyn AtlasStore) -> Result<(), RouteError> {
        let mut current = atlas
            .region(&self.region_id)
            .ok_or_else(|| RouteError::UnknownRegion(self.region_id.clone()))?;

        let start = atlas
            .special_point(&self.start)
            .ok_or_else(|| RouteError::UnknownStart(self.start.clone()))?;
        if start.region_id != current.id {
            return Err(RouteError::StartOutsideRegion {
                point: start.id.clone(),
                region: current.id.clone(),
            });
        }

        for (index, op) in self.ops.iter().enumerate() {
            match op {
                RouteOp::Move { x, y, floor } => {
                    if let Some(floor) = floor {
                        if *floor != current.floor {
                            current = atlas.region_on_floor(current, *floor).ok_or_else(|| {
                                RouteError::UnknownFloor {
                                    index,
                                    floor: *floor,
                                    region: current.id.clone(),
                                }
                            })?;
                        }
                    }
                    if !current.contains(*x, *y) {
                        return Err(RouteError::OutOfBounds {
                            index,
                            x: *x,
                            y: *y,
                            region: current.id.clone(),
                        });
                    }
                }
                RouteOp::Wait { timeout_secs, .. } => {
                    if !(*timeout_secs > 0.0) {
                        return Err(RouteError::BadTimeout { index });
                    }
                }
                RouteOp::Patrol | RouteOp::Interact { .. } | RouteOp::MarkVisited => {}
            }
        }
        Ok(())
    }
}
