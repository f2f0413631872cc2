use crate::regs::opcode;
use crate::timeline::TimelineHandle;

/// Host → guest command opcodes understood by the register protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HostOpcode {
    CreateSyncTimeline,
    CreateSyncFence,
    SyncTimelineInc,
    DestroySyncTimeline,
}

impl HostOpcode {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            opcode::CREATE_SYNC_TIMELINE => Some(Self::CreateSyncTimeline),
            opcode::CREATE_SYNC_FENCE => Some(Self::CreateSyncFence),
            opcode::SYNC_TIMELINE_INC => Some(Self::SyncTimelineInc),
            opcode::DESTROY_SYNC_TIMELINE => Some(Self::DestroySyncTimeline),
            _ => None,
        }
    }

    pub fn to_raw(self) -> u32 {
        match self {
            Self::CreateSyncTimeline => opcode::CREATE_SYNC_TIMELINE,
            Self::CreateSyncFence => opcode::CREATE_SYNC_FENCE,
            Self::SyncTimelineInc => opcode::SYNC_TIMELINE_INC,
            Self::DestroySyncTimeline => opcode::DESTROY_SYNC_TIMELINE,
        }
    }
}

/// A command read from the host through the response registers.
///
/// `opcode` is kept raw so the dispatcher can log opcodes it does not recognise.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HostCommand {
    pub opcode: u32,
    pub timeline_handle: u64,
    /// `HOST_CMD_TIME_ARG`, sign-extended. Hosts are expected to report positive steps only.
    pub increase_step: i64,
}

impl HostCommand {
    pub fn timeline_inc(handle: TimelineHandle, step: i64) -> Self {
        Self {
            opcode: opcode::SYNC_TIMELINE_INC,
            timeline_handle: handle.as_raw(),
            increase_step: step,
        }
    }

    pub fn kind(&self) -> Option<HostOpcode> {
        HostOpcode::from_raw(self.opcode)
    }
}

/// A command written by the guest through the command registers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GuestCommand {
    pub opcode: u32,
    pub timeline_handle: u64,
    pub wait_target_seqno: u64,
}

impl GuestCommand {
    /// Ask the host to notify `handle` once its progress reaches `target_seqno`.
    pub fn trigger_host_wait(handle: TimelineHandle, target_seqno: u64) -> Self {
        Self {
            opcode: opcode::TRIGGER_HOST_WAIT,
            timeline_handle: handle.as_raw(),
            wait_target_seqno: target_seqno,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_opcode_raw_values_round_trip() {
        for op in [
            HostOpcode::CreateSyncTimeline,
            HostOpcode::CreateSyncFence,
            HostOpcode::SyncTimelineInc,
            HostOpcode::DestroySyncTimeline,
        ] {
            assert_eq!(HostOpcode::from_raw(op.to_raw()), Some(op));
        }
        assert_eq!(HostOpcode::from_raw(opcode::NONE), None);
        assert_eq!(HostOpcode::from_raw(opcode::TRIGGER_HOST_WAIT), None);
        assert_eq!(HostOpcode::from_raw(0xdead), None);
    }

    #[test]
    fn trigger_host_wait_uses_guest_opcode() {
        let cmd = GuestCommand::trigger_host_wait(TimelineHandle::from_raw(7), 42);
        assert_eq!(cmd.opcode, opcode::TRIGGER_HOST_WAIT);
        assert_eq!(cmd.timeline_handle, 7);
        assert_eq!(cmd.wait_target_seqno, 42);
    }
}
