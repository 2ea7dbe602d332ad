//! SDHCI/EMMC driver (BCM2710).
//!
//! Drives the Arasan SDHCI core behind the VideoCore: mailbox power-on,
//! the CMD0–ACMD41 identification dance, 4-bit/high-speed switching, then
//! PIO single-block and CMD25 multi-block transfers.  Multi-block reads
//! take the DMA path on channel 4 with DREQ pacing when available.
//!
//! The controller runs polled; the interrupt register is used as a status
//! word with every bit unmasked.

use super::{bcm_dma, gpio, mailbox};
use crate::arch::{self, mmio_read32, mmio_write32};
use crate::config::platform::{EMMC_BASE, EMMC_DATA_BUS_ADDR};
use kikios_storage::block::{BlockDevice, BlockError, SECTOR_SIZE};
use spin::Mutex;

/// Register offsets.
#[allow(dead_code)]
mod regs {
    pub const ARG2: usize = 0x00;
    pub const BLKSIZECNT: usize = 0x04;
    pub const ARG1: usize = 0x08;
    pub const CMDTM: usize = 0x0C;
    pub const RESP0: usize = 0x10;
    pub const RESP1: usize = 0x14;
    pub const RESP2: usize = 0x18;
    pub const RESP3: usize = 0x1C;
    pub const DATA: usize = 0x20;
    pub const STATUS: usize = 0x24;
    pub const CONTROL0: usize = 0x28;
    pub const CONTROL1: usize = 0x2C;
    pub const INTERRUPT: usize = 0x30;
    pub const IRPT_MASK: usize = 0x34;
    pub const IRPT_EN: usize = 0x38;
    pub const CONTROL2: usize = 0x3C;
    pub const SLOTISR_VER: usize = 0xFC;
}

/// CMDTM fields.
mod cmdtm {
    pub const TM_BLKCNT_EN: u32 = 1 << 1;
    pub const TM_AUTO_CMD12: u32 = 1 << 2;
    pub const TM_DAT_DIR_READ: u32 = 1 << 4;
    pub const TM_MULTI_BLOCK: u32 = 1 << 5;
    pub const RSPNS_136: u32 = 1 << 16;
    pub const RSPNS_48: u32 = 2 << 16;
    pub const RSPNS_48_BUSY: u32 = 3 << 16;
    pub const CRCCHK_EN: u32 = 1 << 19;
    pub const ISDATA: u32 = 1 << 21;
    pub const INDEX_SHIFT: u32 = 24;
}

/// INTERRUPT bits.
mod intr {
    pub const CMD_DONE: u32 = 1 << 0;
    pub const DATA_DONE: u32 = 1 << 1;
    pub const WRITE_RDY: u32 = 1 << 4;
    pub const READ_RDY: u32 = 1 << 5;
    pub const ERR: u32 = 1 << 15;
    pub const CTO_ERR: u32 = 1 << 16;
    pub const DTO_ERR: u32 = 1 << 20;
    pub const ERROR_MASK: u32 = 0xFFFF_0000;
}

/// CONTROL0 bits.
mod ctrl0 {
    pub const DWIDTH_4BIT: u32 = 1 << 1;
    pub const HS_EN: u32 = 1 << 2;
}

/// CONTROL1 bits.
mod ctrl1 {
    pub const CLK_INTLEN: u32 = 1 << 0;
    pub const CLK_STABLE: u32 = 1 << 1;
    pub const CLK_EN: u32 = 1 << 2;
    pub const DATA_TOUNIT_MAX: u32 = 0xE << 16;
    pub const SRST_HC: u32 = 1 << 24;
}

/// Identification clock.
const CLOCK_ID_HZ: u32 = 400_000;
/// Default-speed data clock.
const CLOCK_NORMAL_HZ: u32 = 25_000_000;
/// High-speed data clock.
const CLOCK_HS_HZ: u32 = 50_000_000;
/// Base-clock fallback when the mailbox query fails.
const BASE_CLOCK_FALLBACK_HZ: u32 = 100_000_000;

/// Words per sector when shoveling PIO.
const WORDS_PER_SECTOR: usize = SECTOR_SIZE / 4;

/// Driver failure causes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdError {
    Uninitialized,
    CommandTimeout,
    DataTimeout,
    /// CRC or any other controller error bit.
    Error,
}

impl From<SdError> for BlockError {
    fn from(_: SdError) -> Self {
        BlockError::Io
    }
}

fn reg_read(off: usize) -> u32 {
    unsafe { mmio_read32(EMMC_BASE + off) }
}

fn reg_write(off: usize, v: u32) {
    unsafe { mmio_write32(EMMC_BASE + off, v) }
}

struct EmmcInner {
    sdhc: bool,
    dma_enabled: bool,
}

/// The EMMC block device.
pub struct Emmc {
    inner: Mutex<Option<EmmcInner>>,
}

/// Singleton instance registered with the HAL.
pub static EMMC: Emmc = Emmc {
    inner: Mutex::new(None),
};

/// Wait for interrupt bits, returning the status word.  `DATA_DONE` waits
/// get the longer data timeout.
fn wait_interrupt(mask: u32, timeout_us: u32) -> Result<u32, SdError> {
    let mut waited = 0;
    loop {
        let status = reg_read(regs::INTERRUPT);
        if status & intr::ERROR_MASK != 0 {
            reg_write(regs::INTERRUPT, status);
            return Err(if status & intr::CTO_ERR != 0 {
                SdError::CommandTimeout
            } else if status & intr::DTO_ERR != 0 {
                SdError::DataTimeout
            } else {
                SdError::Error
            });
        }
        if status & mask != 0 {
            reg_write(regs::INTERRUPT, status & mask);
            return Ok(status);
        }
        if waited >= timeout_us {
            return Err(SdError::DataTimeout);
        }
        arch::delay_us(1);
        waited += 1;
    }
}

/// Issue a command and return RESP0.
fn send_command(cmdtm: u32, arg: u32) -> Result<u32, SdError> {
    reg_write(regs::INTERRUPT, 0xFFFF_FFFF);
    reg_write(regs::ARG1, arg);
    reg_write(regs::CMDTM, cmdtm);
    wait_interrupt(intr::CMD_DONE, 1_000_000)?;
    Ok(reg_read(regs::RESP0))
}

fn cmd(index: u32, flags: u32) -> u32 {
    (index << cmdtm::INDEX_SHIFT) | flags
}

/// Application command prefix.
fn send_app_command(index: u32, flags: u32, arg: u32, rca: u32) -> Result<u32, SdError> {
    send_command(cmd(55, cmdtm::RSPNS_48 | cmdtm::CRCCHK_EN), rca << 16)?;
    send_command(cmd(index, flags), arg)
}

/// Program the SD clock for `target` Hz using the 10-bit divided mode.
fn set_clock(base: u32, target: u32) -> Result<(), SdError> {
    let mut c1 = reg_read(regs::CONTROL1) & !ctrl1::CLK_EN;
    reg_write(regs::CONTROL1, c1);

    let div = (base / (2 * target)).max(1).min(0x3FF);
    c1 &= !(0xFF << 8 | 0x3 << 6);
    c1 |= (div & 0xFF) << 8;
    c1 |= ((div >> 8) & 0x3) << 6;
    c1 |= ctrl1::CLK_INTLEN | ctrl1::DATA_TOUNIT_MAX;
    reg_write(regs::CONTROL1, c1);

    // Clock-stable is specified to settle within 10 ms.
    let mut waited = 0;
    while reg_read(regs::CONTROL1) & ctrl1::CLK_STABLE == 0 {
        if waited >= 10_000 {
            return Err(SdError::DataTimeout);
        }
        arch::delay_us(1);
        waited += 1;
    }
    reg_write(regs::CONTROL1, reg_read(regs::CONTROL1) | ctrl1::CLK_EN);
    Ok(())
}

/// Bring up the controller and identify the card.
pub fn init() -> Result<(), SdError> {
    // Power the SD block and find the controller's base clock.
    if !mailbox::set_power_state(mailbox::devices::SD_CARD, true) {
        crate::serial_println!("[SD] mailbox power-on failed");
        return Err(SdError::Error);
    }
    let base_clock =
        mailbox::get_clock_rate(mailbox::clocks::EMMC).unwrap_or(BASE_CLOCK_FALLBACK_HZ);
    gpio::setup_emmc_pads();

    // Controller soft reset.
    reg_write(regs::CONTROL1, reg_read(regs::CONTROL1) | ctrl1::SRST_HC);
    let mut waited = 0;
    while reg_read(regs::CONTROL1) & ctrl1::SRST_HC != 0 {
        if waited >= 1_000_000 {
            return Err(SdError::DataTimeout);
        }
        arch::delay_us(1);
        waited += 1;
    }

    // Identification clock, everything unmasked for polling.
    set_clock(base_clock, CLOCK_ID_HZ)?;
    reg_write(regs::IRPT_EN, 0xFFFF_FFFF);
    reg_write(regs::IRPT_MASK, 0xFFFF_FFFF);

    // GO_IDLE, then the v2 interface check: the card must echo 0xAA.
    send_command(cmd(0, 0), 0)?;
    let r = send_command(cmd(8, cmdtm::RSPNS_48 | cmdtm::CRCCHK_EN), 0x1AA)?;
    if r & 0xFFF != 0x1AA {
        crate::serial_println!("[SD] CMD8 echo mismatch: {:#x}", r);
        return Err(SdError::Error);
    }

    // ACMD41 until the card leaves busy; HCS | 3.3 V window.
    let mut ocr;
    let mut attempts = 0;
    loop {
        ocr = send_app_command(41, cmdtm::RSPNS_48, 0x40FF_8000, 0)?;
        if ocr & (1 << 31) != 0 {
            break;
        }
        if attempts >= 100 {
            return Err(SdError::DataTimeout);
        }
        arch::delay_ms(10);
        attempts += 1;
    }
    let sdhc = ocr & (1 << 30) != 0;

    // CID, relative address, select.
    send_command(cmd(2, cmdtm::RSPNS_136), 0)?;
    let rca = send_command(cmd(3, cmdtm::RSPNS_48 | cmdtm::CRCCHK_EN), 0)? >> 16;
    send_command(cmd(7, cmdtm::RSPNS_48_BUSY | cmdtm::CRCCHK_EN), rca << 16)?;

    // Byte-addressed cards need the block length pinned.
    if !sdhc {
        send_command(cmd(16, cmdtm::RSPNS_48 | cmdtm::CRCCHK_EN), SECTOR_SIZE as u32)?;
    }

    // Best effort: 4-bit bus, then high speed.
    let mut high_speed = false;
    if send_app_command(6, cmdtm::RSPNS_48 | cmdtm::CRCCHK_EN, 2, rca).is_ok() {
        reg_write(regs::CONTROL0, reg_read(regs::CONTROL0) | ctrl0::DWIDTH_4BIT);
    }
    if switch_high_speed().is_ok() {
        reg_write(regs::CONTROL0, reg_read(regs::CONTROL0) | ctrl0::HS_EN);
        high_speed = true;
    }
    set_clock(base_clock, if high_speed { CLOCK_HS_HZ } else { CLOCK_NORMAL_HZ })?;

    crate::serial_println!(
        "[SD] card ready: {} rca={:#x} {}",
        if sdhc { "SDHC" } else { "SDSC" },
        rca,
        if high_speed { "high-speed" } else { "default-speed" }
    );

    *EMMC.inner.lock() = Some(EmmcInner {
        sdhc,
        dma_enabled: true,
    });
    Ok(())
}

/// CMD6: query/set function group 1 to high speed.  The 64-byte status
/// block comes back over the data lines.
fn switch_high_speed() -> Result<(), SdError> {
    reg_write(regs::BLKSIZECNT, (1 << 16) | 64);
    send_command(
        cmd(6, cmdtm::RSPNS_48 | cmdtm::CRCCHK_EN | cmdtm::ISDATA | cmdtm::TM_DAT_DIR_READ),
        0x80FF_FFF1,
    )?;
    wait_interrupt(intr::READ_RDY, 100_000)?;
    let mut status = [0u32; 16];
    for word in status.iter_mut() {
        *word = reg_read(regs::DATA);
    }
    wait_interrupt(intr::DATA_DONE, 100_000)?;

    // Function-group-1 result nibble: 0x1 means the switch took.
    let group1 = (status[4] >> 24) & 0xF;
    if group1 == 1 {
        Ok(())
    } else {
        Err(SdError::Error)
    }
}

impl EmmcInner {
    fn data_address(&self, lba: u32) -> u32 {
        if self.sdhc {
            lba
        } else {
            lba * SECTOR_SIZE as u32
        }
    }

    /// PIO single-block read.
    fn read_single(&self, lba: u32, buf: &mut [u8]) -> Result<(), SdError> {
        reg_write(regs::BLKSIZECNT, (1 << 16) | SECTOR_SIZE as u32);
        send_command(
            cmd(
                17,
                cmdtm::RSPNS_48 | cmdtm::CRCCHK_EN | cmdtm::ISDATA | cmdtm::TM_DAT_DIR_READ,
            ),
            self.data_address(lba),
        )?;
        wait_interrupt(intr::READ_RDY, 500_000)?;
        for i in 0..WORDS_PER_SECTOR {
            let word = reg_read(regs::DATA);
            buf[i * 4..i * 4 + 4].copy_from_slice(&word.to_le_bytes());
        }
        wait_interrupt(intr::DATA_DONE, 500_000)?;
        Ok(())
    }

    /// DMA multi-block read on channel 4 with DREQ pacing.
    fn read_multi_dma(&self, lba: u32, buf: &mut [u8], count: u32) -> Result<(), SdError> {
        let len = count as usize * SECTOR_SIZE;
        let dst = buf.as_mut_ptr() as usize;
        arch::cache_clean_invalidate_range(dst, len);

        let mut cb = bcm_dma::ControlBlock::default();
        bcm_dma::start_peripheral_read(
            EMMC_DATA_BUS_ADDR,
            dst,
            len,
            crate::config::platform::DREQ_EMMC,
            &mut cb,
        );

        reg_write(regs::BLKSIZECNT, (count << 16) | SECTOR_SIZE as u32);
        let r = send_command(
            cmd(
                18,
                cmdtm::RSPNS_48
                    | cmdtm::CRCCHK_EN
                    | cmdtm::ISDATA
                    | cmdtm::TM_DAT_DIR_READ
                    | cmdtm::TM_MULTI_BLOCK
                    | cmdtm::TM_BLKCNT_EN
                    | cmdtm::TM_AUTO_CMD12,
            ),
            self.data_address(lba),
        );
        if let Err(e) = r {
            return Err(e);
        }

        if !bcm_dma::wait_peripheral_read() {
            return Err(SdError::DataTimeout);
        }
        wait_interrupt(intr::DATA_DONE, 5_000_000)?;
        arch::cache_clean_invalidate_range(dst, len);
        Ok(())
    }

    /// PIO multi-block read fallback.
    fn read_multi_pio(&self, lba: u32, buf: &mut [u8], count: u32) -> Result<(), SdError> {
        reg_write(regs::BLKSIZECNT, (count << 16) | SECTOR_SIZE as u32);
        send_command(
            cmd(
                18,
                cmdtm::RSPNS_48
                    | cmdtm::CRCCHK_EN
                    | cmdtm::ISDATA
                    | cmdtm::TM_DAT_DIR_READ
                    | cmdtm::TM_MULTI_BLOCK
                    | cmdtm::TM_BLKCNT_EN
                    | cmdtm::TM_AUTO_CMD12,
            ),
            self.data_address(lba),
        )?;
        for block in 0..count as usize {
            wait_interrupt(intr::READ_RDY, 500_000)?;
            for i in 0..WORDS_PER_SECTOR {
                let word = reg_read(regs::DATA);
                let off = block * SECTOR_SIZE + i * 4;
                buf[off..off + 4].copy_from_slice(&word.to_le_bytes());
            }
        }
        wait_interrupt(intr::DATA_DONE, 1_000_000)?;
        Ok(())
    }

    /// PIO single-block write.
    fn write_single(&self, lba: u32, buf: &[u8]) -> Result<(), SdError> {
        reg_write(regs::BLKSIZECNT, (1 << 16) | SECTOR_SIZE as u32);
        send_command(
            cmd(24, cmdtm::RSPNS_48 | cmdtm::CRCCHK_EN | cmdtm::ISDATA),
            self.data_address(lba),
        )?;
        wait_interrupt(intr::WRITE_RDY, 500_000)?;
        for i in 0..WORDS_PER_SECTOR {
            let word = u32::from_le_bytes([
                buf[i * 4],
                buf[i * 4 + 1],
                buf[i * 4 + 2],
                buf[i * 4 + 3],
            ]);
            reg_write(regs::DATA, word);
        }
        wait_interrupt(intr::DATA_DONE, 500_000)?;
        Ok(())
    }

    /// CMD25 multi-block write, PIO with auto-CMD12.
    fn write_multi(&self, lba: u32, buf: &[u8], count: u32) -> Result<(), SdError> {
        reg_write(regs::BLKSIZECNT, (count << 16) | SECTOR_SIZE as u32);
        send_command(
            cmd(
                25,
                cmdtm::RSPNS_48
                    | cmdtm::CRCCHK_EN
                    | cmdtm::ISDATA
                    | cmdtm::TM_MULTI_BLOCK
                    | cmdtm::TM_BLKCNT_EN
                    | cmdtm::TM_AUTO_CMD12,
            ),
            self.data_address(lba),
        )?;
        for block in 0..count as usize {
            wait_interrupt(intr::WRITE_RDY, 500_000)?;
            for i in 0..WORDS_PER_SECTOR {
                let off = block * SECTOR_SIZE + i * 4;
                let word =
                    u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]]);
                reg_write(regs::DATA, word);
            }
        }
        wait_interrupt(intr::DATA_DONE, 1_000_000)?;
        Ok(())
    }
}

impl BlockDevice for Emmc {
    fn read(&self, lba: u32, buf: &mut [u8], count: u32) -> Result<(), BlockError> {
        let len = count as usize * SECTOR_SIZE;
        if buf.len() < len || count == 0 {
            return Err(BlockError::OutOfRange);
        }
        let guard = self.inner.lock();
        let inner = guard.as_ref().ok_or(BlockError::Io)?;
        if count == 1 {
            inner.read_single(lba, buf)?;
        } else if inner.dma_enabled {
            inner.read_multi_dma(lba, buf, count)?;
        } else {
            inner.read_multi_pio(lba, buf, count)?;
        }
        Ok(())
    }

    fn write(&self, lba: u32, buf: &[u8], count: u32) -> Result<(), BlockError> {
        let len = count as usize * SECTOR_SIZE;
        if buf.len() < len || count == 0 {
            return Err(BlockError::OutOfRange);
        }
        let guard = self.inner.lock();
        let inner = guard.as_ref().ok_or(BlockError::Io)?;
        if count == 1 {
            inner.write_single(lba, buf)?;
        } else {
            inner.write_multi(lba, buf, count)?;
        }
        Ok(())
    }

    fn sector_count(&self) -> u32 {
        // The capacity is not tracked; the filesystem bounds itself by the
        // partition table.
        u32::MAX
    }
}
