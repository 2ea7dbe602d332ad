//! USB enumeration.
//!
//! Walks the bus depth-first: read the first 8 descriptor bytes at
//! address 0, assign an address, pull the full device and configuration
//! descriptors, then bind what the interfaces declare — hubs recurse
//! through their ports, boot-protocol HID keyboards and mice are handed
//! to the interrupt pipeline.  A failing device never aborts its
//! siblings.

use super::xfer::{control_transfer, ControlData, SetupPacket, Target};
use super::{EnumContext, UsbDevice, UsbError, UsbSpeed};
use crate::arch;
use bitflags::bitflags;
use core::sync::atomic::{AtomicU8, Ordering};

/// Standard descriptor types.
const DESC_DEVICE: u8 = 1;
const DESC_CONFIGURATION: u8 = 2;
const DESC_INTERFACE: u8 = 4;
const DESC_ENDPOINT: u8 = 5;
/// Hub class descriptor.
const DESC_HUB: u8 = 0x29;

/// Standard requests.
const REQ_GET_DESCRIPTOR: u8 = 0x06;
const REQ_SET_ADDRESS: u8 = 0x05;
const REQ_SET_CONFIGURATION: u8 = 0x09;
const REQ_SET_FEATURE: u8 = 0x03;
const REQ_CLEAR_FEATURE: u8 = 0x01;
const REQ_GET_STATUS: u8 = 0x00;
/// HID class requests.
const REQ_SET_IDLE: u8 = 0x0A;
const REQ_SET_PROTOCOL: u8 = 0x0B;

/// Device classes.
const CLASS_HID: u8 = 3;
const CLASS_HUB: u8 = 9;
/// HID boot-interface protocols.
const PROTO_KEYBOARD: u8 = 1;
const PROTO_MOUSE: u8 = 2;

/// Hub port features.
const PORT_FEATURE_POWER: u16 = 8;
const PORT_FEATURE_RESET: u16 = 4;
const PORT_FEATURE_C_CONNECTION: u16 = 16;
const PORT_FEATURE_C_ENABLE: u16 = 17;
const PORT_FEATURE_C_RESET: u16 = 20;

bitflags! {
    /// Hub port status word (wPortStatus).
    #[derive(Debug, Clone, Copy)]
    struct PortStatus: u32 {
        const CONNECTED = 1 << 0;
        const ENABLED = 1 << 1;
        const SUSPENDED = 1 << 2;
        const OVERCURRENT = 1 << 3;
        const RESET = 1 << 4;
        const POWERED = 1 << 8;
        const LOW_SPEED = 1 << 9;
        const HIGH_SPEED = 1 << 10;
    }
}

/// Next address to hand out.
static NEXT_ADDRESS: AtomicU8 = AtomicU8::new(1);

fn get_descriptor(target: &Target, desc_type: u8, index: u8, buf: &mut [u8]) -> Result<usize, UsbError> {
    let setup = SetupPacket {
        request_type: 0x80,
        request: REQ_GET_DESCRIPTOR,
        value: ((desc_type as u16) << 8) | index as u16,
        index: 0,
        length: buf.len() as u16,
    };
    control_transfer(target, &setup, ControlData::In(buf))
}

fn class_request_to_interface(
    target: &Target,
    request: u8,
    value: u16,
    interface: u16,
) -> Result<(), UsbError> {
    let setup = SetupPacket {
        request_type: 0x21,
        request,
        value,
        index: interface,
        length: 0,
    };
    control_transfer(target, &setup, ControlData::None).map(|_| ())
}

/// Enumerate the device answering at address 0 on `(parent_hub,
/// parent_port)`.  Returns its assigned address.
pub fn enumerate_at(parent_hub: u8, parent_port: u8, speed: UsbSpeed) -> Result<u8, UsbError> {
    super::set_enum_context(EnumContext {
        parent_hub,
        parent_port,
        speed,
    });

    // First 8 bytes of the device descriptor tell us bMaxPacketSize0.
    let mut head = [0u8; 8];
    let target0 = Target::resolve(0, 8).ok_or(UsbError::Timeout)?;
    get_descriptor(&target0, DESC_DEVICE, 0, &mut head)?;
    let mut max_packet = head[7] as u16;
    if max_packet == 0 || max_packet > 64 {
        max_packet = 8;
    }

    // Claim an address and move the device onto it.
    let address = NEXT_ADDRESS.load(Ordering::Relaxed);
    if address >= 127 {
        super::clear_enum_context();
        return Err(UsbError::NoFreeAddress);
    }
    let target0 = Target::resolve(0, max_packet).ok_or(UsbError::Timeout)?;
    let setup = SetupPacket {
        request_type: 0x00,
        request: REQ_SET_ADDRESS,
        value: address as u16,
        index: 0,
        length: 0,
    };
    control_transfer(&target0, &setup, ControlData::None)?;
    NEXT_ADDRESS.fetch_add(1, Ordering::Relaxed);
    arch::delay_ms(10);
    super::clear_enum_context();

    super::add_device(UsbDevice {
        address,
        speed,
        max_packet_size: max_packet,
        parent_hub,
        parent_port,
        is_hub: false,
        hub_ports: 0,
    });

    let target = Target::resolve(address, max_packet).ok_or(UsbError::Timeout)?;

    // Full device descriptor, then the whole configuration.
    let mut device_desc = [0u8; 18];
    get_descriptor(&target, DESC_DEVICE, 0, &mut device_desc)?;
    let vendor = u16::from_le_bytes([device_desc[8], device_desc[9]]);
    let product = u16::from_le_bytes([device_desc[10], device_desc[11]]);
    crate::serial_println!(
        "[USB] addr {}: {:04x}:{:04x} {:?}-speed mps {}",
        address,
        vendor,
        product,
        speed,
        max_packet
    );

    let mut config = [0u8; 256];
    let got = get_descriptor(&target, DESC_CONFIGURATION, 0, &mut config[..9])?;
    if got < 9 {
        return Err(UsbError::BadDescriptor);
    }
    let total = u16::from_le_bytes([config[2], config[3]]) as usize;
    let total = total.clamp(9, 256);
    get_descriptor(&target, DESC_CONFIGURATION, 0, &mut config[..total])?;
    let config_value = config[5];

    // Walk interface and endpoint descriptors.
    let mut is_hub = false;
    let mut current_iface: Option<(u8, u8, u8)> = None; // (number, class, protocol)
    let mut keyboard: Option<(u16, u8, u16)> = None; // (iface, endpoint, mps)
    let mut mouse: Option<(u16, u8, u16)> = None;

    let mut off = 0;
    while off + 2 <= total {
        let len = config[off] as usize;
        if len < 2 || off + len > total {
            break;
        }
        match config[off + 1] {
            DESC_INTERFACE => {
                let number = config[off + 2];
                let class = config[off + 5];
                let protocol = config[off + 7];
                current_iface = Some((number, class, protocol));
                if class == CLASS_HUB {
                    is_hub = true;
                }
            }
            DESC_ENDPOINT => {
                let ep_addr = config[off + 2];
                let attributes = config[off + 3] & 0x3;
                let mps = u16::from_le_bytes([config[off + 4], config[off + 5]]);
                let is_interrupt_in = attributes == 3 && ep_addr & 0x80 != 0;
                if let (Some((number, CLASS_HID, protocol)), true) =
                    (current_iface, is_interrupt_in)
                {
                    let slot = (number as u16, ep_addr & 0xF, mps);
                    match protocol {
                        PROTO_KEYBOARD if keyboard.is_none() => keyboard = Some(slot),
                        PROTO_MOUSE if mouse.is_none() => mouse = Some(slot),
                        _ => {}
                    }
                }
            }
            _ => {}
        }
        off += len;
    }

    // Activate the configuration before class traffic.
    let setup = SetupPacket {
        request_type: 0x00,
        request: REQ_SET_CONFIGURATION,
        value: config_value as u16,
        index: 0,
        length: 0,
    };
    control_transfer(&target, &setup, ControlData::None)?;

    // Boot-protocol HID: force the boot report format and no idle rate,
    // then hand the endpoint to the interrupt pipeline.  Only the first
    // keyboard and first mouse get subscribed.
    if let Some((iface, endpoint, mps)) = keyboard {
        class_request_to_interface(&target, REQ_SET_PROTOCOL, 0, iface)?;
        class_request_to_interface(&target, REQ_SET_IDLE, 0, iface)?;
        super::hid::bind_keyboard(address, endpoint, mps);
        crate::serial_println!("[USB] addr {}: boot keyboard (ep {})", address, endpoint);
    }
    if let Some((iface, endpoint, mps)) = mouse {
        class_request_to_interface(&target, REQ_SET_PROTOCOL, 0, iface)?;
        class_request_to_interface(&target, REQ_SET_IDLE, 0, iface)?;
        super::hid::bind_mouse(address, endpoint, mps);
        crate::serial_println!("[USB] addr {}: boot mouse (ep {})", address, endpoint);
    }

    if is_hub {
        if let Err(e) = enumerate_hub(address) {
            crate::serial_println!("[USB] hub {} enumeration failed: {:?}", address, e);
        }
    }

    Ok(address)
}

/// Mark a device as a hub and bring up its ports.
fn enumerate_hub(address: u8) -> Result<(), UsbError> {
    let target = Target::resolve(address, 64).ok_or(UsbError::Timeout)?;

    // Hub class descriptor: port count is byte 2.
    let mut hub_desc = [0u8; 9];
    let setup = SetupPacket {
        request_type: 0xA0,
        request: REQ_GET_DESCRIPTOR,
        value: (DESC_HUB as u16) << 8,
        index: 0,
        length: 9,
    };
    control_transfer(&target, &setup, ControlData::In(&mut hub_desc))?;
    let ports = hub_desc[2].min(7);

    super::update_device(address, |d| {
        d.is_hub = true;
        d.hub_ports = ports;
    });
    crate::serial_println!("[USB] addr {}: hub with {} ports", address, ports);

    for port in 1..=ports {
        if let Err(e) = bring_up_hub_port(&target, address, port) {
            // Siblings keep enumerating.
            crate::serial_println!("[USB] hub {} port {}: {:?}", address, port, e);
        }
    }
    Ok(())
}

fn port_status(target: &Target, port: u8) -> Result<PortStatus, UsbError> {
    let mut status = [0u8; 4];
    let setup = SetupPacket {
        request_type: 0xA3,
        request: REQ_GET_STATUS,
        value: 0,
        index: port as u16,
        length: 4,
    };
    control_transfer(target, &setup, ControlData::In(&mut status))?;
    Ok(PortStatus::from_bits_truncate(u32::from_le_bytes(status)))
}

fn port_feature(target: &Target, request: u8, feature: u16, port: u8) -> Result<(), UsbError> {
    let setup = SetupPacket {
        request_type: 0x23,
        request,
        value: feature,
        index: port as u16,
        length: 0,
    };
    control_transfer(target, &setup, ControlData::None).map(|_| ())
}

/// Power, reset, and recursively enumerate one hub port.
fn bring_up_hub_port(target: &Target, hub_address: u8, port: u8) -> Result<(), UsbError> {
    port_feature(target, REQ_SET_FEATURE, PORT_FEATURE_POWER, port)?;
    arch::delay_ms(100);

    let status = port_status(target, port)?;
    if !status.contains(PortStatus::CONNECTED) {
        return Ok(());
    }

    // Reset and poll until the hub releases it (bounded at 200 ms).
    port_feature(target, REQ_SET_FEATURE, PORT_FEATURE_RESET, port)?;
    let mut status = PortStatus::empty();
    let mut cleared = false;
    for _ in 0..20 {
        arch::delay_ms(10);
        status = port_status(target, port)?;
        if !status.contains(PortStatus::RESET) {
            cleared = true;
            break;
        }
    }
    if !cleared {
        return Err(UsbError::PortNeverEnabled);
    }

    for feature in [
        PORT_FEATURE_C_RESET,
        PORT_FEATURE_C_CONNECTION,
        PORT_FEATURE_C_ENABLE,
    ] {
        port_feature(target, REQ_CLEAR_FEATURE, feature, port)?;
    }

    let speed = if status.contains(PortStatus::LOW_SPEED) {
        UsbSpeed::Low
    } else if status.contains(PortStatus::HIGH_SPEED) {
        UsbSpeed::High
    } else {
        UsbSpeed::Full
    };

    enumerate_at(hub_address, port, speed).map(|_| ())
}

/// Enumerate from the root port: reset it, then walk whatever answers.
pub fn enumerate_bus() -> Result<(), UsbError> {
    if !super::dwc2::port_connected() {
        crate::serial_println!("[USB] no device on the root port");
        return Ok(());
    }
    let speed = super::dwc2::port_power_and_reset()?;
    match enumerate_at(0, 0, speed) {
        Ok(addr) => {
            crate::serial_println!(
                "[USB] enumeration complete: {} device(s), root at addr {}",
                super::device_count(),
                addr
            );
            Ok(())
        }
        Err(e) => Err(e),
    }
}
