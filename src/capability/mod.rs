//! 能力层：注册表与契约、调用器、内置能力
//!
//! 内置能力：echo、list_files、read_file（无副作用）；shell（白名单放行）；
//! send_message（总需审批）；summarize（治理器压缩用）；memory_save / memory_recall。

pub mod echo;
pub mod filesystem;
pub mod invoker;
pub mod memory;
pub mod registry;
pub mod schema;
pub mod shell;
pub mod summarize;
pub mod webhook;

pub use echo::EchoCapability;
pub use filesystem::{ListFilesCapability, ReadFileCapability, SafeFs};
pub use invoker::CapabilityInvoker;
pub use memory::{MemoryRecallCapability, MemorySaveCapability};
pub use registry::{canonical_invocation, Capability, CapabilityContract, CapabilityRegistry};
pub use schema::step_schema_json;
pub use shell::ShellCapability;
pub use summarize::SummarizeCapability;
pub use webhook::SendMessageCapability;
