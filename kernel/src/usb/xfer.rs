//! USB transfer engine.
//!
//! Synchronous control transfers over channel 0, used by enumeration.
//! Each stage programs the channel's shadow registers, hands the DMA
//! engine a cache-maintained bounce buffer, enables the channel, and
//! polls for completion with bounded retries.  Split transactions run
//! the state machine in [`super::split`] inline, since enumeration is
//! the only caller and may block.

use super::dwc2::{self, hcchar, hcint, hcsplt, hctsiz, regs, EndpointType};
use super::split::{SplitAction, SplitEvent, SplitPhase, SplitState};
use super::{UsbError, UsbSpeed};
use crate::arch;
use crate::memory::DmaBuffer;
use spin::Mutex;

/// Channel dedicated to control transfers.
const CTRL_CHANNEL: usize = 0;

/// NAK retries before a control stage is abandoned.
const MAX_NAK_RETRIES: u32 = 50;

/// Per-stage completion timeout in microseconds.
const STAGE_TIMEOUT_US: u32 = 500_000;

/// Restarts tolerated for one split transaction.
const MAX_SPLIT_RESTARTS: u32 = 20;

/// A SETUP packet.
#[derive(Debug, Clone, Copy)]
pub struct SetupPacket {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub length: u16,
}

impl SetupPacket {
    /// Serialize for the wire.
    pub fn as_bytes(&self) -> [u8; 8] {
        let v = self.value.to_le_bytes();
        let i = self.index.to_le_bytes();
        let l = self.length.to_le_bytes();
        [
            self.request_type,
            self.request,
            v[0],
            v[1],
            i[0],
            i[1],
            l[0],
            l[1],
        ]
    }

    /// Whether the data stage (if any) moves device-to-host.
    pub fn is_in(&self) -> bool {
        self.request_type & 0x80 != 0
    }
}

/// Where a transfer is going, with its split routing resolved.
#[derive(Debug, Clone, Copy)]
pub struct Target {
    pub address: u8,
    pub speed: UsbSpeed,
    pub max_packet: u16,
    /// `Some((tt_hub_address, tt_port))` when the transfer must use
    /// split transactions.
    pub split: Option<(u8, u8)>,
}

impl Target {
    /// Routing for the device at `address`; address 0 uses the recorded
    /// enumeration context.
    pub fn resolve(address: u8, max_packet: u16) -> Option<Target> {
        if address == 0 {
            let ctx = super::enum_context()?;
            return Some(Target {
                address: 0,
                speed: ctx.speed,
                max_packet,
                split: split_route(ctx.speed, ctx.parent_hub, ctx.parent_port),
            });
        }
        let dev = super::find_device(address)?;
        Some(Target {
            address,
            speed: dev.speed,
            max_packet: dev.max_packet_size,
            split: split_route(dev.speed, dev.parent_hub, dev.parent_port),
        })
    }
}

/// Split transactions apply when a FS/LS device sits below a high-speed
/// hub; the transaction translator is the nearest high-speed ancestor.
pub fn split_route(speed: UsbSpeed, parent_hub: u8, parent_port: u8) -> Option<(u8, u8)> {
    if speed == UsbSpeed::High {
        return None;
    }
    let mut hub_addr = parent_hub;
    let mut port = parent_port;
    while hub_addr != 0 {
        let hub = super::find_device(hub_addr)?;
        if hub.speed == UsbSpeed::High {
            return Some((hub_addr, port));
        }
        port = hub.parent_port;
        hub_addr = hub.parent_hub;
    }
    None
}

/// Direction of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dir {
    In,
    Out,
}

/// Data stage payload.
pub enum ControlData<'a> {
    None,
    In(&'a mut [u8]),
    Out(&'a [u8]),
}

/// Bounce buffer shared by all control stages; 64-byte aligned for cache
/// maintenance.
static BOUNCE: Mutex<Option<DmaBuffer>> = Mutex::new(None);

/// Allocate the engine's DMA bounce buffer.
pub fn init() {
    let mut guard = BOUNCE.lock();
    if guard.is_none() {
        *guard = DmaBuffer::new(512, 64);
    }
}

/// What a completed stage reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StageOutcome {
    /// Completed; bytes left un-transferred per `HCTSIZ`.
    Complete { remaining: usize },
    Ack,
    Nak,
    Nyet,
    Stall,
    Babble,
    XactError,
    AhbError,
    Timeout,
}

/// Program and run one bus transaction on the control channel.
fn run_stage(
    target: &Target,
    dir: Dir,
    pid: u32,
    buf_addr: usize,
    len: usize,
    compsplt: bool,
) -> StageOutcome {
    let ch = CTRL_CHANNEL;
    dwc2::halt_channel(ch);

    // Split routing, when the target sits behind a transaction translator.
    let splt = match target.split {
        Some((hub, port)) => {
            hcsplt::SPLTENA
                | ((hub as u32) << hcsplt::HUBADDR_SHIFT)
                | ((port as u32) << hcsplt::PRTADDR_SHIFT)
                | if compsplt { hcsplt::COMPSPLT } else { 0 }
        }
        None => 0,
    };
    dwc2::ch_write(ch, regs::HCSPLT0, splt);

    let mut chr = (target.max_packet as u32 & hcchar::MPS_MASK)
        | ((EndpointType::Control as u32) << hcchar::EPTYPE_SHIFT)
        | (1 << hcchar::MC_SHIFT)
        | ((target.address as u32) << hcchar::DEVADDR_SHIFT);
    if dir == Dir::In {
        chr |= hcchar::EPDIR_IN;
    }
    if target.speed == UsbSpeed::Low {
        chr |= hcchar::LSDEV;
    }
    // The scheduler wants the parity of the frame the channel starts in.
    if dwc2::frame_number() & 1 != 0 {
        chr |= hcchar::ODDFRM;
    }

    dwc2::ch_write(ch, regs::HCINT0, 0xFFFF_FFFF);
    dwc2::ch_write(
        ch,
        regs::HCINTMSK0,
        hcint::XFERCOMPL
            | hcint::CHHLTD
            | hcint::STALL
            | hcint::NAK
            | hcint::ACK
            | hcint::XACTERR
            | hcint::BBLERR
            | hcint::AHBERR,
    );

    let packets = if len == 0 {
        1
    } else {
        len.div_ceil(target.max_packet as usize) as u32
    };
    dwc2::ch_write(ch, regs::HCDMA0, buf_addr as u32);
    dwc2::ch_write(
        ch,
        regs::HCTSIZ0,
        (len as u32 & hctsiz::XFERSIZE_MASK) | (packets << hctsiz::PKTCNT_SHIFT) | pid,
    );
    dwc2::ch_write(ch, regs::HCCHAR0, chr | hcchar::CHEN);

    // Poll for completion or halt.
    let mut waited = 0;
    loop {
        let int = dwc2::ch_read(ch, regs::HCINT0);
        if int & hcint::XFERCOMPL != 0 {
            let remaining = (dwc2::ch_read(ch, regs::HCTSIZ0) & hctsiz::XFERSIZE_MASK) as usize;
            dwc2::ch_write(ch, regs::HCINT0, 0xFFFF_FFFF);
            return StageOutcome::Complete { remaining };
        }
        if int & hcint::CHHLTD != 0 {
            dwc2::ch_write(ch, regs::HCINT0, 0xFFFF_FFFF);
            return if int & hcint::STALL != 0 {
                StageOutcome::Stall
            } else if int & hcint::BBLERR != 0 {
                StageOutcome::Babble
            } else if int & hcint::AHBERR != 0 {
                StageOutcome::AhbError
            } else if int & hcint::XACTERR != 0 {
                StageOutcome::XactError
            } else if int & hcint::NYET != 0 {
                StageOutcome::Nyet
            } else if int & hcint::NAK != 0 {
                StageOutcome::Nak
            } else if int & hcint::ACK != 0 {
                StageOutcome::Ack
            } else {
                StageOutcome::XactError
            };
        }
        if waited >= STAGE_TIMEOUT_US {
            dwc2::halt_channel(ch);
            return StageOutcome::Timeout;
        }
        arch::delay_us(1);
        waited += 1;
    }
}

/// Map a hard stage outcome to the engine's error taxonomy.
fn stage_error(outcome: StageOutcome) -> UsbError {
    match outcome {
        StageOutcome::Stall => UsbError::Stall,
        StageOutcome::Babble => UsbError::Babble,
        StageOutcome::AhbError => UsbError::AhbError,
        StageOutcome::Timeout => UsbError::Timeout,
        _ => UsbError::TransactionError,
    }
}

/// One stage, with split handling and NAK retry.  Returns bytes moved.
fn do_stage(target: &Target, dir: Dir, pid: u32, data: &mut [u8], len: usize) -> Result<usize, UsbError> {
    let mut bounce_guard = BOUNCE.lock();
    let bounce = bounce_guard.as_mut().ok_or(UsbError::Timeout)?;
    let buf_addr = bounce.addr();

    if dir == Dir::Out && len > 0 {
        bounce.as_mut_slice()[..len].copy_from_slice(&data[..len]);
    }
    // Outbound: the controller must see what the CPU wrote.
    arch::cache_clean_range(buf_addr, len.max(1));

    let moved = if target.split.is_some() {
        do_stage_split(target, dir, pid, buf_addr, len)?
    } else {
        do_stage_simple(target, dir, pid, buf_addr, len)?
    };

    if dir == Dir::In && moved > 0 {
        // Inbound: drop any stale lines before reading what DMA wrote.
        arch::cache_clean_invalidate_range(buf_addr, len.max(1));
        data[..moved].copy_from_slice(&bounce.as_slice()[..moved]);
    }
    Ok(moved)
}

fn do_stage_simple(
    target: &Target,
    dir: Dir,
    pid: u32,
    buf_addr: usize,
    len: usize,
) -> Result<usize, UsbError> {
    for _ in 0..=MAX_NAK_RETRIES {
        match run_stage(target, dir, pid, buf_addr, len, false) {
            StageOutcome::Complete { remaining } => return Ok(len - remaining.min(len)),
            StageOutcome::Ack => return Ok(len),
            StageOutcome::Nak => {
                arch::delay_ms(1);
                continue;
            }
            StageOutcome::Nyet => {
                // Only meaningful on splits; treat as retry.
                arch::delay_ms(1);
                continue;
            }
            outcome => return Err(stage_error(outcome)),
        }
    }
    Err(UsbError::Timeout)
}

/// Drive one stage through the start/complete-split machine.
fn do_stage_split(
    target: &Target,
    dir: Dir,
    pid: u32,
    buf_addr: usize,
    len: usize,
) -> Result<usize, UsbError> {
    let mut state = SplitState::new();
    let mut restarts = 0;
    loop {
        let compsplt = state.phase == SplitPhase::CompleteSplit;
        if compsplt {
            // Honor the inter-phase microframe gap before every
            // complete-split attempt.
            let mut spins = 0;
            while !state.ready_for_complete(dwc2::frame_number()) {
                if spins > 10_000 {
                    break;
                }
                arch::delay_us(125);
                spins += 1;
            }
        }

        let outcome = run_stage(target, dir, pid, buf_addr, len, compsplt);
        let event = match outcome {
            StageOutcome::Complete { remaining } => {
                let _ = state.on_event(SplitEvent::XferComplete, dwc2::frame_number());
                return Ok(len - remaining.min(len));
            }
            StageOutcome::Ack => SplitEvent::Ack,
            StageOutcome::Nyet => SplitEvent::Nyet,
            StageOutcome::Nak => SplitEvent::Nak,
            outcome => return Err(stage_error(outcome)),
        };

        match state.on_event(event, dwc2::frame_number()) {
            SplitAction::Done => return Ok(len),
            SplitAction::WaitThenComplete | SplitAction::RetryComplete => continue,
            SplitAction::Restart => {
                restarts += 1;
                if restarts > MAX_SPLIT_RESTARTS {
                    return Err(UsbError::Timeout);
                }
                arch::delay_ms(1);
            }
            SplitAction::Fail => return Err(UsbError::TransactionError),
        }
    }
}

/// A full control transfer: SETUP, optional DATA, STATUS.  Returns the
/// number of data bytes moved.
///
/// Stages are strictly ordered; no new control transfer starts on this
/// channel until the STATUS stage has completed or failed.
pub fn control_transfer(
    target: &Target,
    setup: &SetupPacket,
    data: ControlData<'_>,
) -> Result<usize, UsbError> {
    // SETUP stage: 8 bytes, SETUP PID, always OUT.
    let mut setup_bytes = setup.as_bytes();
    do_stage(target, Dir::Out, hctsiz::PID_SETUP, &mut setup_bytes, 8)?;

    // DATA stage, PID DATA1; the core toggles per packet from there.
    let mut transferred = 0;
    let data_dir = match &data {
        ControlData::None => None,
        ControlData::In(_) => Some(Dir::In),
        ControlData::Out(_) => Some(Dir::Out),
    };
    match data {
        ControlData::None => {}
        ControlData::In(buf) => {
            let len = (setup.length as usize).min(buf.len());
            if len > 0 {
                transferred = do_stage(target, Dir::In, hctsiz::PID_DATA1, buf, len)?;
            }
        }
        ControlData::Out(buf) => {
            let len = (setup.length as usize).min(buf.len()).min(512);
            if len > 0 {
                // The bounce copy wants a mutable slice; clone out.
                let mut tmp = [0u8; 512];
                tmp[..len].copy_from_slice(&buf[..len]);
                transferred = do_stage(target, Dir::Out, hctsiz::PID_DATA1, &mut tmp, len)?;
            }
        }
    }

    // STATUS stage: zero-length, DATA1, opposite direction of DATA (IN
    // when there was no data).
    let status_dir = match data_dir {
        Some(Dir::In) => Dir::Out,
        _ => Dir::In,
    };
    let mut empty = [0u8; 0];
    do_stage(target, status_dir, hctsiz::PID_DATA1, &mut empty, 0)?;

    Ok(transferred)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_packet_layout() {
        let setup = SetupPacket {
            request_type: 0x80,
            request: 0x06,
            value: 0x0100,
            index: 0,
            length: 18,
        };
        assert_eq!(setup.as_bytes(), [0x80, 0x06, 0x00, 0x01, 0, 0, 18, 0]);
        assert!(setup.is_in());
    }

    #[test]
    fn split_route_finds_nearest_hs_hub() {
        use super::super::{add_device, UsbDevice};
        // HS hub at 40 on the root; FS device on its port 3.
        add_device(UsbDevice {
            address: 40,
            speed: UsbSpeed::High,
            max_packet_size: 64,
            parent_hub: 0,
            parent_port: 2,
            is_hub: true,
            hub_ports: 4,
        });
        assert_eq!(split_route(UsbSpeed::Full, 40, 3), Some((40, 3)));
        // A high-speed device never splits.
        assert_eq!(split_route(UsbSpeed::High, 40, 3), None);
        // Directly on the root port: no TT anywhere.
        assert_eq!(split_route(UsbSpeed::Full, 0, 1), None);
        super::super::remove_subtree(0, 2);
    }
}
