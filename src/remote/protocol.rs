//! 行协议解析与处理
use tracing::{debug, warn};

use crate::config::TuningSettings;
use crate::pipeline::SettingsPublisher;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request<'a> {
    GetData,
    SetData(&'a str),
}

/// Splits a line at its first `:`. Lines without a separator or with an
/// unknown command yield `None`.
pub fn parse_request(line: &str) -> Option<Request<'_>> {
    let line = line.trim_end_matches(['\r', '\n']);
    let (command, payload) = line.split_once(':')?;
    match command {
        "get-data" => Some(Request::GetData),
        "set-data" => Some(Request::SetData(payload)),
        _ => None,
    }
}

/// Handles one line and returns the reply line (without newline), if any.
pub fn handle_line(line: &str, publisher: &mut SettingsPublisher) -> Option<String> {
    match parse_request(line)? {
        Request::GetData => match serde_json::to_string(publisher.current()) {
            Ok(json) => Some(format!("data:{json}")),
            Err(e) => {
                warn!("⚠️  序列化参数失败: {}", e);
                None
            }
        },
        Request::SetData(payload) => {
            match serde_json::from_str::<TuningSettings>(payload) {
                Ok(settings) => match publisher.publish(settings) {
                    Ok(()) => debug!("参数已更新"),
                    Err(e) => warn!("⚠️  拒绝无效参数: {}", e),
                },
                Err(e) => warn!("⚠️  参数解析失败: {}", e),
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!(parse_request("get-data:"), Some(Request::GetData));
        assert_eq!(parse_request("get-data:\r\n"), Some(Request::GetData));
        assert_eq!(
            parse_request(r#"set-data:{"a":1}"#),
            Some(Request::SetData(r#"{"a":1}"#))
        );
        assert_eq!(parse_request("get-data"), None);
        assert_eq!(parse_request("reboot:now"), None);
    }

    #[test]
    fn test_get_then_set() {
        let mut publisher = SettingsPublisher::new(TuningSettings::default());
        let updates = publisher.subscribe();

        let reply = handle_line("get-data:", &mut publisher).unwrap();
        let json = reply.strip_prefix("data:").unwrap();
        let mut settings: TuningSettings = serde_json::from_str(json).unwrap();
        assert_eq!(settings, TuningSettings::default());

        settings.y_sensitivity = 1.5;
        let line = format!("set-data:{}", serde_json::to_string(&settings).unwrap());
        assert!(handle_line(&line, &mut publisher).is_none());
        assert_eq!(publisher.current().y_sensitivity, 1.5);
        assert!(updates.try_recv().is_ok());
    }

    #[test]
    fn test_malformed_payload_ignored() {
        let mut publisher = SettingsPublisher::new(TuningSettings::default());
        let updates = publisher.subscribe();
        assert!(handle_line("set-data:{oops", &mut publisher).is_none());
        assert!(handle_line(r#"set-data:{"XSensitivity":1.0}"#, &mut publisher).is_none());
        assert_eq!(publisher.current(), &TuningSettings::default());
        assert!(updates.try_recv().is_err());
    }
}
