//! Wire protocol of the kiosk's local hardware API.
//!
//! Commands are JSON `POST`s to `/system/...` endpoints carrying two-digit
//! motor and type codes. Events arrive on the WebSocket feed as JSON objects
//! keyed by a `function` code.

use rvm_core::error::FeedError;
use rvm_core::{BeltMotion, HardwareCommand, HardwareEvent, ModuleId, SorterPosition};
use serde_json::{Value, json};

pub const MOTOR_SELECT: &str = "/system/serial/motorSelect";
pub const STEP_MOTOR_SELECT: &str = "/system/serial/stepMotorSelect";
pub const GET_WEIGHT: &str = "/system/serial/getWeight";
pub const WEIGHT_CALIBRATION: &str = "/system/serial/weightCalibration";
pub const GET_MODULE_ID: &str = "/system/serial/getModuleId";
pub const CAMERA_PROCESS: &str = "/system/camera/process";

const DEVICE_TYPE: u8 = 1;

/// `(motor id, type)` pairs understood by `motorSelect`.
pub mod motor {
    pub const GATE_OPEN: (&str, &str) = ("01", "03");
    pub const GATE_CLOSE: (&str, &str) = ("01", "01");
    pub const BELT_TO_CAMERA: (&str, &str) = ("02", "02");
    pub const BELT_TO_SORTER: (&str, &str) = ("02", "03");
    pub const BELT_REVERSE: (&str, &str) = ("02", "01");
    pub const BELT_STOP: (&str, &str) = ("02", "00");
    pub const COMPACTOR_START: (&str, &str) = ("04", "01");
    pub const COMPACTOR_STOP: (&str, &str) = ("04", "00");
}

/// The sorter's stepper answers on a fixed module id of its own.
pub const STEPPER_MODULE_ID: &str = "09";

pub fn stepper_code(position: SorterPosition) -> &'static str {
    match position {
        SorterPosition::Home => "01",
        SorterPosition::MetalCan => "02",
        SorterPosition::PlasticBottle => "03",
    }
}

/// A fully encoded local-API call.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub path: &'static str,
    pub body: Value,
}

fn motor_select(module: &ModuleId, (motor_id, kind): (&str, &str)) -> ApiRequest {
    ApiRequest {
        path: MOTOR_SELECT,
        body: json!({
            "moduleId": module.0,
            "motorId": motor_id,
            "type": kind,
            "deviceType": DEVICE_TYPE,
        }),
    }
}

/// Encode a command for the given module.
pub fn encode(module: &ModuleId, command: &HardwareCommand) -> ApiRequest {
    match command {
        HardwareCommand::OpenGate => motor_select(module, motor::GATE_OPEN),
        HardwareCommand::CloseGate => motor_select(module, motor::GATE_CLOSE),
        HardwareCommand::Belt { motion } => {
            let code = match motion {
                BeltMotion::ToCamera => motor::BELT_TO_CAMERA,
                BeltMotion::ToSorter => motor::BELT_TO_SORTER,
                BeltMotion::Reverse => motor::BELT_REVERSE,
                BeltMotion::Stop => motor::BELT_STOP,
            };
            motor_select(module, code)
        }
        HardwareCommand::CompactorStart => motor_select(module, motor::COMPACTOR_START),
        HardwareCommand::CompactorStop => motor_select(module, motor::COMPACTOR_STOP),
        HardwareCommand::CustomMotor {
            motor_id,
            motor_type,
        } => motor_select(module, (motor_id.as_str(), motor_type.as_str())),
        HardwareCommand::Sorter { position } => {
            let code = stepper_code(*position);
            ApiRequest {
                path: STEP_MOTOR_SELECT,
                body: json!({
                    "moduleId": STEPPER_MODULE_ID,
                    "id": code,
                    "type": code,
                    "deviceType": DEVICE_TYPE,
                }),
            }
        }
        HardwareCommand::CapturePhoto => ApiRequest {
            path: CAMERA_PROCESS,
            body: json!({}),
        },
        HardwareCommand::ReadWeight => ApiRequest {
            path: GET_WEIGHT,
            body: json!({ "moduleId": module.0, "type": "00" }),
        },
        HardwareCommand::Calibrate => ApiRequest {
            path: WEIGHT_CALIBRATION,
            body: json!({ "moduleId": module.0, "type": "00" }),
        },
    }
}

pub fn module_id_request() -> ApiRequest {
    ApiRequest {
        path: GET_MODULE_ID,
        body: json!({}),
    }
}

/// Feed `function` codes.
mod function {
    pub const MODULE_ID: &str = "01";
    pub const MOTION: &str = "02";
    pub const WEIGHT: &str = "06";
    pub const AI_PHOTO: &str = "aiPhoto";
    pub const DEVICE_STATUS: &str = "deviceStatus";
}

/// `data` value of a `02` message that signals a limit switch.
const LIMIT_REACHED: &str = "03";

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Decode one feed message.
///
/// `Ok(None)` means the message is well-formed but not one the controller
/// acts on.
pub fn parse_feed_message(text: &str) -> Result<Option<HardwareEvent>, FeedError> {
    let message: Value =
        serde_json::from_str(text).map_err(|e| FeedError::Malformed(e.to_string()))?;

    let Some(function) = message.get("function").and_then(as_text) else {
        return Ok(None);
    };
    let data = message.get("data");

    let event = match function.as_str() {
        function::MODULE_ID => {
            let module_id = message
                .get("moduleId")
                .and_then(as_text)
                .filter(|id| !id.is_empty())
                .ok_or_else(|| FeedError::Malformed("module id message without moduleId".into()))?;
            Some(HardwareEvent::ModuleReady {
                module_id: ModuleId(module_id),
            })
        }
        function::AI_PHOTO => Some(parse_ai_photo(data)?),
        function::DEVICE_STATUS => {
            let code = data
                .and_then(as_text)
                .and_then(|s| s.parse::<u8>().ok())
                .ok_or_else(|| FeedError::Malformed(format!("bad deviceStatus data: {data:?}")))?;
            Some(HardwareEvent::BinFull { code })
        }
        function::WEIGHT => {
            // The scale sends garbage while settling; treat it as zero.
            let raw = data
                .and_then(as_text)
                .and_then(|s| s.parse::<f64>().ok())
                .filter(|w| w.is_finite())
                .unwrap_or(0.0);
            Some(HardwareEvent::Weight { raw })
        }
        function::MOTION => match data.and_then(as_text) {
            Some(code) if code == LIMIT_REACHED => Some(HardwareEvent::LimitReached),
            _ => None,
        },
        _ => None,
    };

    Ok(event)
}

/// `aiPhoto` carries its payload as a JSON string inside `data`; newer
/// firmware sends the object directly.
fn parse_ai_photo(data: Option<&Value>) -> Result<HardwareEvent, FeedError> {
    let payload = match data {
        Some(Value::String(s)) => {
            serde_json::from_str::<Value>(s).map_err(|e| FeedError::Malformed(e.to_string()))?
        }
        Some(v @ Value::Object(_)) => v.clone(),
        _ => return Err(FeedError::Malformed("aiPhoto without data".into())),
    };

    let label = payload
        .get("className")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let confidence = payload
        .get("probability")
        .and_then(Value::as_f64)
        .unwrap_or(0.0);
    let task_id = payload.get("taskId").and_then(as_text);

    Ok(HardwareEvent::Classified {
        label,
        confidence,
        task_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module() -> ModuleId {
        ModuleId("11".into())
    }

    #[test]
    fn belt_commands_use_motor_two() {
        let req = encode(&module(), &HardwareCommand::belt(BeltMotion::ToSorter));
        assert_eq!(req.path, MOTOR_SELECT);
        assert_eq!(req.body["moduleId"], "11");
        assert_eq!(req.body["motorId"], "02");
        assert_eq!(req.body["type"], "03");
        assert_eq!(req.body["deviceType"], 1);
    }

    #[test]
    fn sorter_uses_stepper_module() {
        let req = encode(&module(), &HardwareCommand::sorter(SorterPosition::MetalCan));
        assert_eq!(req.path, STEP_MOTOR_SELECT);
        assert_eq!(req.body["moduleId"], STEPPER_MODULE_ID);
        assert_eq!(req.body["id"], "02");
        assert_eq!(req.body["type"], "02");
    }

    #[test]
    fn camera_and_scale_endpoints() {
        assert_eq!(
            encode(&module(), &HardwareCommand::CapturePhoto).path,
            CAMERA_PROCESS
        );
        let req = encode(&module(), &HardwareCommand::Calibrate);
        assert_eq!(req.path, WEIGHT_CALIBRATION);
        assert_eq!(req.body["type"], "00");
    }

    #[test]
    fn custom_motor_passes_codes_through() {
        let cmd = HardwareCommand::CustomMotor {
            motor_id: "04".into(),
            motor_type: "01".into(),
        };
        let req = encode(&module(), &cmd);
        assert_eq!(req.body["motorId"], "04");
        assert_eq!(req.body["type"], "01");
    }

    #[test]
    fn parses_module_id() {
        let event = parse_feed_message(r#"{"function":"01","moduleId":"11"}"#).unwrap();
        assert_eq!(
            event,
            Some(HardwareEvent::ModuleReady {
                module_id: ModuleId("11".into())
            })
        );
        assert!(parse_feed_message(r#"{"function":"01"}"#).is_err());
    }

    #[test]
    fn parses_ai_photo_with_string_payload() {
        let text = r#"{"function":"aiPhoto","data":"{\"className\":\"1-Can\",\"probability\":0.87,\"taskId\":\"t-9\"}"}"#;
        match parse_feed_message(text).unwrap() {
            Some(HardwareEvent::Classified {
                label,
                confidence,
                task_id,
            }) => {
                assert_eq!(label, "1-Can");
                assert_eq!(confidence, 0.87);
                assert_eq!(task_id.as_deref(), Some("t-9"));
            }
            other => panic!("Expected Classified, got {other:?}"),
        }
    }

    #[test]
    fn parses_ai_photo_with_object_payload() {
        let text = r#"{"function":"aiPhoto","data":{"className":"pet","probability":0.5}}"#;
        assert!(matches!(
            parse_feed_message(text).unwrap(),
            Some(HardwareEvent::Classified { .. })
        ));
    }

    #[test]
    fn parses_weight_and_bin_status() {
        assert_eq!(
            parse_feed_message(r#"{"function":"06","data":"25"}"#).unwrap(),
            Some(HardwareEvent::Weight { raw: 25.0 })
        );
        assert_eq!(
            parse_feed_message(r#"{"function":"06","data":"n/a"}"#).unwrap(),
            Some(HardwareEvent::Weight { raw: 0.0 })
        );
        assert_eq!(
            parse_feed_message(r#"{"function":"deviceStatus","data":"1"}"#).unwrap(),
            Some(HardwareEvent::BinFull { code: 1 })
        );
    }

    #[test]
    fn parses_limit_reached_only_for_code_03() {
        assert_eq!(
            parse_feed_message(r#"{"function":"02","data":"03"}"#).unwrap(),
            Some(HardwareEvent::LimitReached)
        );
        assert_eq!(
            parse_feed_message(r#"{"function":"02","data":"01"}"#).unwrap(),
            None
        );
    }

    #[test]
    fn unknown_and_malformed_messages() {
        assert_eq!(parse_feed_message(r#"{"function":"qrCode"}"#).unwrap(), None);
        assert_eq!(parse_feed_message(r#"{"hello":1}"#).unwrap(), None);
        assert!(parse_feed_message("not json").is_err());
    }
}
