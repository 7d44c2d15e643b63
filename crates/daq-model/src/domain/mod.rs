mod task_id;
pub use task_id::TaskId;

mod control_mode;
pub use control_mode::ControlMode;

mod descriptor;
pub use descriptor::{Command, OutputRouting, TaskDescriptor};

mod state;
pub use state::{DeviceState, GenericState};

mod status;
pub use status::{StatusUpdate, TaskStatus};

mod event;
pub use event::{BasicTaskTerminated, DeviceEvent, DeviceEventKind, DeviceEventOrigin};

mod command;
pub use command::{
    CommandHeader, CommandName, CommandTarget, OutboundMessage, TaskPid, TransitionCommand,
    TransitionRequest, TransitionResponse, TriggerHookCommand, TriggerHookResponse,
};

mod frame;
pub use frame::{
    AckInfo, ErrorInfo, InboundEvent, KillInfo, LaunchInfo, MessageInfo, OutboundFrame,
    SubscribedInfo,
};
