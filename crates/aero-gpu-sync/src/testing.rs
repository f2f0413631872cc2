//! In-memory model of the host side of the sync device, for tests.
//!
//! [`FakeSyncHost`] implements the register protocol from [`crate::regs`]: host commands queued
//! with [`FakeSyncHost::queue_host_command`] are latched one at a time on `HOST_CMD_FETCH`, guest
//! commands are decoded when the doorbell rings. In single-command mode a new command is only
//! latched after `HOST_CMD_ACK`; an unacknowledged fetch re-presents the stale command.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::command::{GuestCommand, HostCommand};
use crate::error::TransportError;
use crate::interrupt::SoftInterrupt;
use crate::regs::{hi32, join64, lo32, mmio, opcode};
use crate::timeline::TimelineHandle;
use crate::transport::{MmioRegisterTransport, SyncMmio};

#[derive(Default)]
struct GuestRegs {
    opcode: u32,
    timeline_lo: u32,
    timeline_hi: u32,
    target_lo: u32,
    target_hi: u32,
}

#[derive(Default)]
struct FakeHostState {
    requires_ack: bool,
    initialized: bool,
    pending: VecDeque<HostCommand>,
    latched: Option<HostCommand>,
    awaiting_ack: bool,
    guest: GuestRegs,
    guest_commands: Vec<GuestCommand>,
    fetches: u64,
    acks: u64,
    /// Number of successful accesses left before the next one fails.
    fail_after: Option<u64>,
    irq: Option<Arc<SoftInterrupt>>,
}

impl FakeHostState {
    fn check_fault(&mut self) -> bool {
        match self.fail_after {
            Some(0) => {
                self.fail_after = None;
                true
            }
            Some(n) => {
                self.fail_after = Some(n - 1);
                false
            }
            None => false,
        }
    }
}

/// Fake host side of the sync device. Cloning shares the same device state.
#[derive(Clone, Default)]
pub struct FakeSyncHost {
    state: Arc<Mutex<FakeHostState>>,
}

impl FakeSyncHost {
    /// A host that can hand out several commands per interrupt.
    pub fn new() -> Self {
        Self::default()
    }

    /// A host that requires `HOST_CMD_ACK` after every command read.
    pub fn single_command() -> Self {
        let host = Self::default();
        host.lock().requires_ack = true;
        host
    }

    fn lock(&self) -> MutexGuard<'_, FakeHostState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn mmio(&self) -> FakeSyncMmio {
        FakeSyncMmio { host: self.clone() }
    }

    pub fn transport(&self) -> MmioRegisterTransport<FakeSyncMmio> {
        MmioRegisterTransport::new(self.mmio())
    }

    /// Raise `irq` every time a host command is queued.
    pub fn connect_interrupt(&self, irq: Arc<SoftInterrupt>) {
        self.lock().irq = Some(irq);
    }

    pub fn queue_host_command(&self, cmd: HostCommand) {
        let irq = {
            let mut state = self.lock();
            state.pending.push_back(cmd);
            state.irq.clone()
        };
        if let Some(irq) = irq {
            irq.trigger();
        }
    }

    pub fn queue_timeline_inc(&self, handle: TimelineHandle, step: i64) {
        self.queue_host_command(HostCommand::timeline_inc(handle, step));
    }

    /// Host commands not yet handed to the guest (a latched, unacknowledged command counts).
    pub fn pending_host_commands(&self) -> usize {
        let state = self.lock();
        state.pending.len() + usize::from(state.awaiting_ack)
    }

    pub fn guest_commands(&self) -> Vec<GuestCommand> {
        self.lock().guest_commands.clone()
    }

    pub fn initialized(&self) -> bool {
        self.lock().initialized
    }

    pub fn fetches(&self) -> u64 {
        self.lock().fetches
    }

    pub fn acks(&self) -> u64 {
        self.lock().acks
    }

    /// Fail the next register access.
    pub fn fail_next_access(&self) {
        self.fail_access_after(0);
    }

    /// Let `n` register accesses succeed, then fail one.
    pub fn fail_access_after(&self, n: u64) {
        self.lock().fail_after = Some(n);
    }
}

/// Register window view of a [`FakeSyncHost`].
#[derive(Clone)]
pub struct FakeSyncMmio {
    host: FakeSyncHost,
}

impl SyncMmio for FakeSyncMmio {
    fn read_u32(&mut self, offset: u64) -> Result<u32, TransportError> {
        let mut state = self.host.lock();
        if state.check_fault() {
            return Err(TransportError::Read { offset });
        }

        let latched = state.latched;
        let value = match (offset, latched) {
            (mmio::HOST_CMD_OPCODE, Some(cmd)) => cmd.opcode,
            (mmio::HOST_CMD_OPCODE, None) => opcode::NONE,
            (mmio::HOST_CMD_HANDLE_LO, Some(cmd)) => lo32(cmd.timeline_handle),
            (mmio::HOST_CMD_HANDLE_HI, Some(cmd)) => hi32(cmd.timeline_handle),
            (mmio::HOST_CMD_TIME_ARG, Some(cmd)) => cmd.increase_step as i32 as u32,
            _ => 0,
        };
        Ok(value)
    }

    fn write_u32(&mut self, offset: u64, value: u32) -> Result<(), TransportError> {
        let mut state = self.host.lock();
        if state.check_fault() {
            return Err(TransportError::Write { offset });
        }

        match offset {
            mmio::INIT => state.initialized = true,
            mmio::HOST_CMD_FETCH => {
                state.fetches += 1;
                if !state.awaiting_ack {
                    state.latched = state.pending.pop_front();
                    state.awaiting_ack = state.requires_ack && state.latched.is_some();
                }
            }
            mmio::HOST_CMD_ACK => {
                state.acks += 1;
                state.awaiting_ack = false;
                state.latched = None;
            }
            mmio::GUEST_CMD_OPCODE => state.guest.opcode = value,
            mmio::GUEST_CMD_TIMELINE_LO => state.guest.timeline_lo = value,
            mmio::GUEST_CMD_TIMELINE_HI => state.guest.timeline_hi = value,
            mmio::GUEST_CMD_TARGET_LO => state.guest.target_lo = value,
            mmio::GUEST_CMD_TARGET_HI => state.guest.target_hi = value,
            mmio::GUEST_CMD_DOORBELL => {
                let cmd = GuestCommand {
                    opcode: state.guest.opcode,
                    timeline_handle: join64(state.guest.timeline_lo, state.guest.timeline_hi),
                    wait_target_seqno: join64(state.guest.target_lo, state.guest.target_hi),
                };
                state.guest_commands.push(cmd);
                state.guest = GuestRegs::default();
            }
            _ => {}
        }
        Ok(())
    }
}
