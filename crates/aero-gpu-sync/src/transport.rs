//! Register transport for the sync device.
//!
//! [`SyncMmio`] is the raw register window; [`MmioRegisterTransport`] layers the command protocol
//! from [`crate::regs`] on top of it. The transport carries no policy: how many commands are read
//! per interrupt and when to acknowledge is decided by [`crate::SyncDevice`].

use crate::command::{GuestCommand, HostCommand};
use crate::error::TransportError;
use crate::regs::{hi32, join64, lo32, mmio, opcode, REG_STROBE};

/// 32-bit register window of the sync device.
pub trait SyncMmio {
    fn read_u32(&mut self, offset: u64) -> Result<u32, TransportError>;
    fn write_u32(&mut self, offset: u64, value: u32) -> Result<(), TransportError>;
}

impl<T: SyncMmio + ?Sized> SyncMmio for Box<T> {
    fn read_u32(&mut self, offset: u64) -> Result<u32, TransportError> {
        (**self).read_u32(offset)
    }

    fn write_u32(&mut self, offset: u64, value: u32) -> Result<(), TransportError> {
        (**self).write_u32(offset, value)
    }
}

/// Boundary between the sync engine and the device's command/status registers.
pub trait RegisterTransport {
    /// One-time handshake performed when the device is created.
    fn init(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Read the next pending host command, or `None` if the host has nothing queued.
    fn read_command(&mut self) -> Result<Option<HostCommand>, TransportError>;

    /// Stage `cmd` and ring the doorbell.
    fn write_command(&mut self, cmd: &GuestCommand) -> Result<(), TransportError>;

    /// Release the command returned by the last [`RegisterTransport::read_command`]. Required by
    /// devices that cannot batch reads before another command can be latched.
    fn acknowledge(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

impl<T: RegisterTransport + ?Sized> RegisterTransport for Box<T> {
    fn init(&mut self) -> Result<(), TransportError> {
        (**self).init()
    }

    fn read_command(&mut self) -> Result<Option<HostCommand>, TransportError> {
        (**self).read_command()
    }

    fn write_command(&mut self, cmd: &GuestCommand) -> Result<(), TransportError> {
        (**self).write_command(cmd)
    }

    fn acknowledge(&mut self) -> Result<(), TransportError> {
        (**self).acknowledge()
    }
}

#[derive(Debug)]
pub struct MmioRegisterTransport<M> {
    mmio: M,
}

impl<M: SyncMmio> MmioRegisterTransport<M> {
    pub fn new(mmio: M) -> Self {
        Self { mmio }
    }

    pub fn mmio(&self) -> &M {
        &self.mmio
    }

    pub fn into_inner(self) -> M {
        self.mmio
    }
}

impl<M: SyncMmio> RegisterTransport for MmioRegisterTransport<M> {
    fn init(&mut self) -> Result<(), TransportError> {
        self.mmio.write_u32(mmio::INIT, REG_STROBE)
    }

    fn read_command(&mut self) -> Result<Option<HostCommand>, TransportError> {
        self.mmio.write_u32(mmio::HOST_CMD_FETCH, REG_STROBE)?;
        let op = self.mmio.read_u32(mmio::HOST_CMD_OPCODE)?;
        if op == opcode::NONE {
            return Ok(None);
        }

        let handle_lo = self.mmio.read_u32(mmio::HOST_CMD_HANDLE_LO)?;
        let handle_hi = self.mmio.read_u32(mmio::HOST_CMD_HANDLE_HI)?;
        let time_arg = self.mmio.read_u32(mmio::HOST_CMD_TIME_ARG)?;

        Ok(Some(HostCommand {
            opcode: op,
            timeline_handle: join64(handle_lo, handle_hi),
            increase_step: i64::from(time_arg as i32),
        }))
    }

    fn write_command(&mut self, cmd: &GuestCommand) -> Result<(), TransportError> {
        self.mmio.write_u32(mmio::GUEST_CMD_OPCODE, cmd.opcode)?;
        self.mmio
            .write_u32(mmio::GUEST_CMD_TIMELINE_LO, lo32(cmd.timeline_handle))?;
        self.mmio
            .write_u32(mmio::GUEST_CMD_TIMELINE_HI, hi32(cmd.timeline_handle))?;
        self.mmio
            .write_u32(mmio::GUEST_CMD_TARGET_LO, lo32(cmd.wait_target_seqno))?;
        self.mmio
            .write_u32(mmio::GUEST_CMD_TARGET_HI, hi32(cmd.wait_target_seqno))?;
        // Doorbell last: the host may consume the command registers as soon as it rings.
        self.mmio.write_u32(mmio::GUEST_CMD_DOORBELL, REG_STROBE)
    }

    fn acknowledge(&mut self) -> Result<(), TransportError> {
        self.mmio.write_u32(mmio::HOST_CMD_ACK, REG_STROBE)
    }
}
