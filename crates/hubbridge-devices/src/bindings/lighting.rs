//! Lights and fans.

use crate::platform::{CharacteristicProps, CharacteristicType as C};

use super::Binder;

pub(crate) fn bind_light(binder: &mut Binder<'_>) {
    let key = binder.primary_service();
    let device = binder.device().clone();

    binder.write(&key, C::On, "switch", None);
    if device.has_attribute("level") || device.has_command("setLevel") {
        binder.write(
            &key,
            C::Brightness,
            "level",
            Some(CharacteristicProps::range(0.0, 100.0, 1.0)),
        );
    }
    if device.has_capability("Color Control") {
        binder.write(
            &key,
            C::Hue,
            "hue",
            Some(CharacteristicProps::range(0.0, 360.0, 1.0)),
        );
        binder.write(
            &key,
            C::Saturation,
            "saturation",
            Some(CharacteristicProps::range(0.0, 100.0, 1.0)),
        );
    }
    if device.has_capability("Color Temperature") {
        binder.write(
            &key,
            C::ColorTemperature,
            "colorTemperature",
            Some(CharacteristicProps::range(140.0, 500.0, 1.0)),
        );
    }
}

pub(crate) fn bind_fan(binder: &mut Binder<'_>) {
    let key = binder.primary_service();
    let device = binder.device().clone();

    binder.write(&key, C::Active, "switch", None);
    let speed_attribute = if device.has_attribute("speed") {
        Some("speed")
    } else if device.has_attribute("level") || device.has_command("setLevel") {
        Some("level")
    } else {
        None
    };
    if let Some(attribute) = speed_attribute {
        binder.write(
            &key,
            C::RotationSpeed,
            attribute,
            Some(CharacteristicProps::range(0.0, 100.0, 1.0)),
        );
    }
}

#[cfg(test)]
mod tests {
    use hubbridge_core::types::Value;

    use crate::bindings::testing::*;
    use crate::bindings::{bind, CommandRequest};
    use crate::classifier::Role;
    use crate::device::DeviceDescriptor;
    use crate::platform::{write_characteristic, CharacteristicType as C, PlatformValue, ServiceKey, ServiceType};

    #[test]
    fn test_color_light_characteristics() {
        let bulb = DeviceDescriptor::new("5", "Bulb")
            .with_capability("Switch")
            .with_capability("Color Control")
            .with_capability("Color Temperature")
            .with_attribute("switch", "off")
            .with_attribute("level", 80)
            .with_attribute("hue", 50)
            .with_attribute("saturation", 100)
            .with_attribute("colorTemperature", 2700);
        let (ctx, sink) = context(bulb);
        let binding = bind(Role::Light, &ctx);
        let key = ServiceKey::primary(ServiceType::Lightbulb);

        assert_eq!(value(&ctx, &key, C::Hue), Some(PlatformValue::Int(180)));
        assert_eq!(value(&ctx, &key, C::ColorTemperature), Some(PlatformValue::Int(370)));
        assert_eq!(value(&ctx, &key, C::On), Some(PlatformValue::Bool(false)));

        push(&ctx, &binding, "switch", Value::from("on"));
        assert_eq!(value(&ctx, &key, C::On), Some(PlatformValue::Bool(true)));

        write_characteristic(&ctx.services, &key, C::Hue, PlatformValue::Int(90));
        write_characteristic(&ctx.services, &key, C::On, PlatformValue::Bool(false));
        assert_eq!(
            sink.taken(),
            vec![
                CommandRequest::new("5", "setHue").with_param(25i64),
                CommandRequest::new("5", "off"),
            ]
        );
    }

    #[test]
    fn test_plain_light_has_no_color() {
        let bulb = DeviceDescriptor::new("5", "Bulb")
            .with_capability("Switch")
            .with_capability("Light")
            .with_attribute("switch", "on");
        let (ctx, _sink) = context(bulb);
        let _binding = bind(Role::Light, &ctx);
        let key = ServiceKey::primary(ServiceType::Lightbulb);
        let characteristics = ctx.services.lock().unwrap().characteristics(&key);
        assert_eq!(characteristics, vec![C::On]);
    }

    #[test]
    fn test_fan_speed_names() {
        let fan = DeviceDescriptor::new("8", "Fan")
            .with_capability("FanControl")
            .with_attribute("switch", "on")
            .with_attribute("speed", "medium")
            .with_command("setSpeed");
        let (ctx, sink) = context(fan);
        let binding = bind(Role::Fan, &ctx);
        let key = ServiceKey::primary(ServiceType::Fanv2);

        assert_eq!(value(&ctx, &key, C::Active), Some(PlatformValue::Int(1)));
        assert_eq!(value(&ctx, &key, C::RotationSpeed), Some(PlatformValue::Int(60)));

        push(&ctx, &binding, "speed", Value::from("low"));
        assert_eq!(value(&ctx, &key, C::RotationSpeed), Some(PlatformValue::Int(20)));

        write_characteristic(&ctx.services, &key, C::RotationSpeed, PlatformValue::Int(100));
        write_characteristic(&ctx.services, &key, C::Active, PlatformValue::Int(0));
        assert_eq!(
            sink.taken(),
            vec![
                CommandRequest::new("8", "setSpeed").with_param("high"),
                CommandRequest::new("8", "off"),
            ]
        );
    }
}
