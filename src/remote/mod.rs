/// 远程调参 (Remote tuning)
///
/// 行协议, 每行 `<command>:<payload>`:
/// - `get-data:`        → `data:<json>`
/// - `set-data:<json>`  → 无回复
pub mod protocol;
pub mod server;

pub use protocol::{handle_line, parse_request, Request};
pub use server::RemoteServer;
