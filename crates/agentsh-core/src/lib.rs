pub mod address;
pub mod agentfile;
pub mod call;
pub mod command;
pub mod console;
pub mod discover;
pub mod handles;
pub mod platform;
pub mod pump;
pub mod registry;
pub mod shell;
pub mod stream;
pub mod tokenize;

pub use handles::AgentId;
pub use handles::PeerId;
pub use handles::Target;
pub use platform::Platform;
pub use shell::Shell;
pub use shell::ShellConfig;
