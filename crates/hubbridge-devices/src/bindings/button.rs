/*!
 * Stateless buttons.
 *
 * A device with N buttons gets N programmable switch services labelled
 * 1..=N. Button events arrive as `pushed`, `doubleTapped` or `held`
 * attribute changes whose value is the button number.
 */
use std::sync::PoisonError;

use tracing::{debug, warn};

use hubbridge_core::types::Value;

use crate::platform::consts::switch_event;
use crate::platform::{
    CharacteristicProps, CharacteristicSpec, CharacteristicType as C, PlatformValue, ServiceKey,
    ServiceType, SharedServices,
};

use super::{Binder, DeviceBinding};

/// Upper bound on the number of button services per device
const MAX_BUTTONS: i64 = 32;

fn button_key(number: i64) -> ServiceKey {
    ServiceKey::with_subtype(ServiceType::StatelessProgrammableSwitch, format!("button{}", number))
}

pub(crate) fn bind_button(binder: &mut Binder<'_>) {
    let device = binder.device().clone();
    let count = device
        .attribute("numberOfButtons")
        .and_then(Value::to_number)
        .map(|n| n as i64)
        .filter(|n| *n >= 1)
        .unwrap_or(1)
        .min(MAX_BUTTONS);

    let mut events = Vec::new();
    if device.has_capability("PushableButton") {
        events.push(switch_event::SINGLE);
    }
    if device.has_capability("DoubleTapableButton") {
        events.push(switch_event::DOUBLE);
    }
    if device.has_capability("HoldableButton") {
        events.push(switch_event::LONG);
    }

    for number in 1..=count {
        let key = binder.service(button_key(number));
        binder.characteristic(
            &key,
            CharacteristicSpec::new(C::ProgrammableSwitchEvent)
                .props(CharacteristicProps::valid_values(events.clone())),
            &[],
        );
        binder.constant(&key, C::ServiceLabelIndex, PlatformValue::Int(number));
    }
}

/// Forward a button event to the matching button service
pub(crate) fn on_event(
    binding: &DeviceBinding,
    services: &SharedServices,
    attribute: &str,
    raw: &Value,
    _meta: Option<&Value>,
) {
    let event = match attribute {
        "pushed" => switch_event::SINGLE,
        "doubleTapped" => switch_event::DOUBLE,
        "held" => switch_event::LONG,
        _ => return,
    };
    let Some(number) = raw.to_number().map(|n| n as i64) else {
        warn!("Button event {}={} without a button number", attribute, raw);
        return;
    };
    let key = button_key(number);
    if !binding.services().contains(&key) {
        warn!("Button {} is not exposed for this device", number);
        return;
    }
    debug!("Button {} {}", number, attribute);
    services
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .update_value(&key, C::ProgrammableSwitchEvent, PlatformValue::Int(event));
}
