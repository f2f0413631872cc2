//! Register layout of the sync device's MMIO window.
//!
//! All registers are 32 bits wide and little-endian. 64-bit values (timeline handles, sequence
//! numbers) are split across `*_LO`/`*_HI` pairs.
//!
//! Guest → host: write `GUEST_CMD_OPCODE`, the timeline and target pairs, then ring
//! `GUEST_CMD_DOORBELL`.
//!
//! Host → guest: write `HOST_CMD_FETCH` to latch the next pending command, read `HOST_CMD_OPCODE`
//! (`0` means nothing is pending), then the handle pair and `HOST_CMD_TIME_ARG`. Devices that
//! cannot batch reads only latch a new command after `HOST_CMD_ACK` is written.

pub mod mmio {
    pub const HOST_CMD_FETCH: u64 = 0x00;
    pub const GUEST_CMD_DOORBELL: u64 = 0x04;
    pub const HOST_CMD_ACK: u64 = 0x08;
    pub const INIT: u64 = 0x18;

    pub const HOST_CMD_OPCODE: u64 = 0x20;
    pub const HOST_CMD_HANDLE_LO: u64 = 0x24;
    pub const HOST_CMD_HANDLE_HI: u64 = 0x28;
    pub const HOST_CMD_TIME_ARG: u64 = 0x2c;

    pub const GUEST_CMD_OPCODE: u64 = 0x40;
    pub const GUEST_CMD_TIMELINE_LO: u64 = 0x44;
    pub const GUEST_CMD_TIMELINE_HI: u64 = 0x48;
    pub const GUEST_CMD_TARGET_LO: u64 = 0x4c;
    pub const GUEST_CMD_TARGET_HI: u64 = 0x50;

    /// Size of the register window in bytes.
    pub const WINDOW_SIZE_BYTES: u64 = 0x54;
}

pub mod opcode {
    /// Read back from `HOST_CMD_OPCODE` when the host has nothing pending.
    pub const NONE: u32 = 0;

    pub const CREATE_SYNC_TIMELINE: u32 = 1;
    pub const CREATE_SYNC_FENCE: u32 = 2;
    pub const SYNC_TIMELINE_INC: u32 = 3;
    pub const DESTROY_SYNC_TIMELINE: u32 = 4;
    pub const TRIGGER_HOST_WAIT: u32 = 5;
}

/// Value written to `HOST_CMD_FETCH`, `HOST_CMD_ACK`, `GUEST_CMD_DOORBELL` and `INIT`.
pub const REG_STROBE: u32 = 0;

pub(crate) fn lo32(value: u64) -> u32 {
    value as u32
}

pub(crate) fn hi32(value: u64) -> u32 {
    (value >> 32) as u32
}

pub(crate) fn join64(lo: u32, hi: u32) -> u64 {
    u64::from(lo) | (u64::from(hi) << 32)
}

// Every register must sit inside the window and be 32-bit aligned.
const _: () = {
    let regs = [
        mmio::HOST_CMD_FETCH,
        mmio::GUEST_CMD_DOORBELL,
        mmio::HOST_CMD_ACK,
        mmio::INIT,
        mmio::HOST_CMD_OPCODE,
        mmio::HOST_CMD_HANDLE_LO,
        mmio::HOST_CMD_HANDLE_HI,
        mmio::HOST_CMD_TIME_ARG,
        mmio::GUEST_CMD_OPCODE,
        mmio::GUEST_CMD_TIMELINE_LO,
        mmio::GUEST_CMD_TIMELINE_HI,
        mmio::GUEST_CMD_TARGET_LO,
        mmio::GUEST_CMD_TARGET_HI,
    ];
    let mut i = 0;
    while i < regs.len() {
        assert!(regs[i] % 4 == 0);
        assert!(regs[i] + 4 <= mmio::WINDOW_SIZE_BYTES);
        i += 1;
    }
};
