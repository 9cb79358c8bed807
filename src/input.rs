use crate::{
    climb::{ClimbUpRequest, DropFromLedgeRequest},
    prelude::*,
    slowmo::SlowMotion,
};

pub(super) fn plugin(app: &mut App) {
    app.add_observer(apply_climb_up)
        .add_observer(apply_drop_from_ledge)
        .add_observer(start_slow_motion)
        .add_observer(stop_slow_motion);
}

/// Climbs up from a hang. Only does something when [`ClimbConfig::auto_climb_up`] is off.
#[derive(Debug, InputAction)]
#[action_output(bool)]
pub struct ClimbUp;

/// Lets go of the ledge while hanging.
#[derive(Debug, InputAction)]
#[action_output(bool)]
pub struct DropFromLedge;

/// Slows the simulation down while held.
#[derive(Debug, InputAction)]
#[action_output(bool)]
pub struct SlowMo;

fn apply_climb_up(climb_up: On<Start<ClimbUp>>, mut requests: MessageWriter<ClimbUpRequest>) {
    requests.write(ClimbUpRequest {
        entity: climb_up.context,
    });
}

fn apply_drop_from_ledge(
    let_go: On<Start<DropFromLedge>>,
    mut requests: MessageWriter<DropFromLedgeRequest>,
) {
    requests.write(DropFromLedgeRequest {
        entity: let_go.context,
    });
}

fn start_slow_motion(slow_mo: On<Start<SlowMo>>, mut slow_motions: Query<&mut SlowMotion>) {
    if let Ok(mut slow_motion) = slow_motions.get_mut(slow_mo.context) {
        slow_motion.start();
    }
}

fn stop_slow_motion(slow_mo: On<Complete<SlowMo>>, mut slow_motions: Query<&mut SlowMotion>) {
    if let Ok(mut slow_motion) = slow_motions.get_mut(slow_mo.context) {
        slow_motion.stop();
    }
}
