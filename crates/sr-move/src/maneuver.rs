use std::time::Duration;

use sr_capture::{GameInput, Key};
use sr_state::EscapeManeuver;
use tracing::debug;

/// Key legs of a maneuver, held one after another. Each strafe leg also
/// holds forward so the player slides along whatever it is stuck on.
pub fn legs(maneuver: EscapeManeuver) -> &'static [&'static [Key]] {
    use Key::{A, D, S, W};
    match maneuver {
        EscapeManeuver::Left => &[&[A, W]],
        EscapeManeuver::Right => &[&[D, W]],
        EscapeManeuver::BackLeft => &[&[S], &[A, W]],
        EscapeManeuver::BackRight => &[&[S], &[D, W]],
        EscapeManeuver::LeftBackRight => &[&[A], &[S], &[D, W]],
        EscapeManeuver::RightBackLeft => &[&[D], &[S], &[A, W]],
    }
}

/// Stop walking and play `maneuver`'s legs. Returns the total time the keys
/// were held.
pub fn perform(input: &mut dyn GameInput, maneuver: EscapeManeuver, base: Duration, attempt: usize) -> Duration {
    let leg = EscapeManeuver::leg_duration(base, attempt);
    debug!("Escape {:?} (attempt {}, {:?} per leg)", maneuver, attempt, leg);
    input.stop_moving_forward();
    let legs = legs(maneuver);
    for keys in legs {
        input.hold_keys(keys, leg);
    }
    leg * legs.len() as u32
}
