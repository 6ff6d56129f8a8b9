/*!
 * Switches, outlets and the hub's virtual mode and piston switches.
 */
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::platform::{CharacteristicSpec, CharacteristicType as C, PlatformValue, SetHandler};

use super::{Binder, CommandRequest};

/// How long a piston switch stays on after being triggered
pub const PISTON_RESET: Duration = Duration::from_secs(1);

pub(crate) fn bind_switch(binder: &mut Binder<'_>) {
    let key = binder.primary_service();
    binder.write(&key, C::On, "switch", None);
}

pub(crate) fn bind_outlet(binder: &mut Binder<'_>) {
    let key = binder.primary_service();
    binder.write(&key, C::On, "switch", None);
    binder.read(&key, C::OutletInUse, "switch");
}

/// Location modes appear as switches that are on while the mode is active.
/// Turning one on activates the mode; turning it off does nothing.
pub(crate) fn bind_virtual_mode(binder: &mut Binder<'_>) {
    let key = binder.primary_service();
    let sink = binder.ctx().sink.clone();
    let device_id = binder.device().id.clone();

    let set: SetHandler = Arc::new(move |value: PlatformValue| {
        if value.as_bool() == Some(true) {
            sink.submit(CommandRequest::new(device_id.clone(), "mode"));
        } else {
            debug!("Ignoring request to leave mode {}", device_id);
        }
    });
    let spec = CharacteristicSpec::new(C::On)
        .on_get(binder.attribute_reader("switch", C::On))
        .on_set(set);
    binder.characteristic(&key, spec, &["switch"]);
}

/// Pistons are momentary: triggering one runs it and the switch falls back
/// to off after `PISTON_RESET`.
pub(crate) fn bind_virtual_piston(binder: &mut Binder<'_>) {
    let key = binder.primary_service();
    let sink = binder.ctx().sink.clone();
    let services = Arc::downgrade(&binder.ctx().services);
    let timers = binder.timers();
    let device_id = binder.device().id.clone();
    let timer_key = key.clone();

    let set: SetHandler = Arc::new(move |value: PlatformValue| {
        if value.as_bool() != Some(true) {
            return;
        }
        sink.submit(CommandRequest::new(device_id.clone(), "piston"));

        let Ok(runtime) = Handle::try_current() else {
            warn!("No runtime to reset piston {}", device_id);
            return;
        };
        let services = services.clone();
        let key = timer_key.clone();
        timers.push(runtime.spawn(async move {
            tokio::time::sleep(PISTON_RESET).await;
            if let Some(services) = services.upgrade() {
                services
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .update_value(&key, C::On, PlatformValue::Bool(false));
            }
        }));
    });
    let spec = CharacteristicSpec::new(C::On)
        .on_get(Arc::new(|| Some(PlatformValue::Bool(false))))
        .on_set(set);
    binder.characteristic(&key, spec, &[]);
}
