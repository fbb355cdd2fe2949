//! Scripted collaborators for controller and route tests.

use image::{Rgba, RgbaImage};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use sr_state::{Clock, ManualClock};
use sr_vision::{
    BattleStatus, CandidateWindow, LargeMapInfo, PositionEstimate, ScreenClassifier, StrategyKind, WorldPoint,
};

use crate::battle::{AttackOutcome, CombatHandler};
use crate::controller::{ControlFlags, Devices, MoveFailure};
use crate::source::{Fix, PositionSource, Signals};

pub fn blank_frame() -> RgbaImage {
    RgbaImage::from_pixel(8, 8, Rgba([0, 0, 0, 255]))
}

/// Arguments of one `locate` call.
#[derive(Debug, Clone)]
pub struct LocateCall {
    pub index: usize,
    pub region_id: String,
    pub windowed: bool,
    pub radius: f64,
}

type FixScript = Box<dyn FnMut(&LocateCall) -> Option<WorldPoint>>;
type SignalScript = Box<dyn FnMut(usize) -> Signals>;

/// Position source driven by closures. Fixes always face straight down.
pub struct ScriptedSource {
    fixes: FixScript,
    signals: SignalScript,
    calls: Vec<LocateCall>,
    signal_calls: usize,
}

impl ScriptedSource {
    pub fn new(fixes: impl FnMut(&LocateCall) -> Option<WorldPoint> + 'static) -> Self {
        Self {
            fixes: Box::new(fixes),
            signals: Box::new(|_| Signals::default()),
            calls: Vec::new(),
            signal_calls: 0,
        }
    }

    pub fn with_signals(mut self, signals: impl FnMut(usize) -> Signals + 'static) -> Self {
        self.signals = Box::new(signals);
        self
    }

    pub fn calls(&self) -> &[LocateCall] {
        &self.calls
    }
}

impl PositionSource for ScriptedSource {
    fn signals(&mut self, _frame: &RgbaImage) -> Signals {
        let i = self.signal_calls;
        self.signal_calls += 1;
        (self.signals)(i)
    }

    fn locate(
        &mut self,
        _frame: &RgbaImage,
        map: &LargeMapInfo,
        window: Option<&CandidateWindow>,
        _running: bool,
    ) -> Option<Fix> {
        let call = LocateCall {
            index: self.calls.len(),
            region_id: map.region.id.clone(),
            windowed: window.is_some(),
            radius: window.map(|w| w.radius).unwrap_or(f64::INFINITY),
        };
        let world = (self.fixes)(&call);
        self.calls.push(call);
        world.map(|world| Fix {
            estimate: PositionEstimate {
                confidence: 1.0,
                world,
                effective_width: 61.0,
                effective_height: 61.0,
                scale: 1.0,
                strategy: StrategyKind::Road,
            },
            facing: Some(90.0),
        })
    }
}

/// Always reports the same screen.
pub struct FixedClassifier(pub BattleStatus);

impl ScreenClassifier for FixedClassifier {
    fn is_normal_in_world(&self, _frame: &RgbaImage) -> bool {
        self.0 == BattleStatus::InWorld
    }

    fn battle_status(&self, _frame: &RgbaImage) -> BattleStatus {
        self.0
    }
}

/// Reports a fixed sequence of screens, then repeats the last one.
pub struct StatusScript {
    statuses: Mutex<VecDeque<BattleStatus>>,
    last: Mutex<BattleStatus>,
    calls: AtomicUsize,
}

impl StatusScript {
    pub fn new(statuses: Vec<BattleStatus>) -> Self {
        Self {
            statuses: Mutex::new(statuses.into()),
            last: Mutex::new(BattleStatus::InWorld),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ScreenClassifier for StatusScript {
    fn is_normal_in_world(&self, frame: &RgbaImage) -> bool {
        self.battle_status(frame) == BattleStatus::InWorld
    }

    fn battle_status(&self, _frame: &RgbaImage) -> BattleStatus {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut last = self.last.lock().unwrap();
        if let Some(next) = self.statuses.lock().unwrap().pop_front() {
            *last = next;
        }
        *last
    }
}

/// Counts fights and attacks without touching any device.
#[derive(Debug, Default)]
pub struct ScriptedCombat {
    pub fights: usize,
    pub attacks: usize,
    pub fail_fights: bool,
    pub miss_attacks: bool,
}

impl CombatHandler for ScriptedCombat {
    fn fight(&mut self, _devices: &mut Devices<'_>) -> Result<(), MoveFailure> {
        self.fights += 1;
        if self.fail_fights {
            return Err(MoveFailure::BattleStuck);
        }
        Ok(())
    }

    fn attack(&mut self, _devices: &mut Devices<'_>) -> Result<AttackOutcome, MoveFailure> {
        self.attacks += 1;
        if self.miss_attacks {
            return Ok(AttackOutcome::Missed);
        }
        Ok(AttackOutcome::Fought)
    }
}

/// Manual clock that pauses the run once `pause_at` has passed and resumes
/// it at `resume_at`.
pub struct PausingClock {
    inner: ManualClock,
    flags: ControlFlags,
    pause_at: Duration,
    resume_at: Duration,
    paused_once: AtomicBool,
}

impl PausingClock {
    pub fn new(flags: ControlFlags, pause_at: Duration, resume_at: Duration) -> Self {
        Self {
            inner: ManualClock::new(),
            flags,
            pause_at,
            resume_at,
            paused_once: AtomicBool::new(false),
        }
    }
}

impl Clock for PausingClock {
    fn now(&self) -> Duration {
        self.inner.now()
    }

    fn sleep(&self, duration: Duration) {
        self.inner.sleep(duration);
        let now = self.inner.now();
        if now >= self.resume_at {
            self.flags.resume();
        } else if now >= self.pause_at && !self.paused_once.swap(true, Ordering::SeqCst) {
            self.flags.pause();
        }
    }
}
