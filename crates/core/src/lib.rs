pub use animation::{AnimationError, Canvas, HOLD_POLL_INTERVAL};
pub use color::{wheel, Color};
pub use command::{Command, CommandKind, ParamDefaults, RawParams, UnknownCommand};
pub use config::{BlingConfig, ConfigError, ConfigManager, OutputConfig};
pub use device::{
    ArtNetStrip, ByteOrder, DeviceError, Frame, MemoryStrip, PixelDevice, SharedDevice,
};
pub use job::{cancellation, CancelHandle, CancelSignal, JobId, JobOutcome, JobState, JobStatus};
pub use listener::{CommandListener, TableKeys, PROCESSED, RECEIVED};
pub use supervisor::{JobSupervisor, StartGate, SupervisorSettings};
pub use table::{MemoryTable, SharedTable, TableError, TableEvent, TableValue, TcpTable};

pub mod animation;
mod color;
mod command;
mod config;
pub mod device;
mod job;
pub mod listener;
mod supervisor;
pub mod table;
