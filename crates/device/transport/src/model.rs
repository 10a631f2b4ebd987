//! Static data about supported device models

use nexum_apdu_core::DeviceModelId;

/// USB vendor id of every supported device
pub const LEDGER_VENDOR_ID: u16 = 0x2c97;

/// BLE characteristics of a model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BleSpec {
    /// GATT service
    pub service_uuid: &'static str,
    /// Characteristic frames are written to with a response
    pub write_uuid: &'static str,
    /// Characteristic frames are written to without a response
    pub write_cmd_uuid: &'static str,
    /// Characteristic frames are notified on
    pub notify_uuid: &'static str,
}

/// Static description of a device model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceModel {
    /// Model identifier
    pub id: DeviceModelId,
    /// Marketing name
    pub product_name: &'static str,
    /// High byte of the USB product id
    pub usb_product_id: u8,
    /// Flash size in bytes
    pub memory_size: u32,
    /// Flash block size in bytes
    pub block_size: u32,
    /// BLE characteristics, for models with Bluetooth
    pub ble: Option<BleSpec>,
}

const NANO_S: DeviceModel = DeviceModel {
    id: DeviceModelId::NanoS,
    product_name: "Ledger Nano S",
    usb_product_id: 0x10,
    memory_size: 320 * 1024,
    block_size: 4 * 1024,
    ble: None,
};

const NANO_SP: DeviceModel = DeviceModel {
    id: DeviceModelId::NanoSp,
    product_name: "Ledger Nano S Plus",
    usb_product_id: 0x50,
    memory_size: 1533 * 1024,
    block_size: 32,
    ble: None,
};

const NANO_X: DeviceModel = DeviceModel {
    id: DeviceModelId::NanoX,
    product_name: "Ledger Nano X",
    usb_product_id: 0x40,
    memory_size: 2 * 1024 * 1024,
    block_size: 4 * 1024,
    ble: Some(BleSpec {
        service_uuid: "13d63400-2c97-0004-0000-4c6564676572",
        write_uuid: "13d63400-2c97-0004-0002-4c6564676572",
        write_cmd_uuid: "13d63400-2c97-0004-0003-4c6564676572",
        notify_uuid: "13d63400-2c97-0004-0001-4c6564676572",
    }),
};

const STAX: DeviceModel = DeviceModel {
    id: DeviceModelId::Stax,
    product_name: "Ledger Stax",
    usb_product_id: 0x60,
    memory_size: 1533 * 1024,
    block_size: 32,
    ble: Some(BleSpec {
        service_uuid: "13d63400-2c97-6004-0000-4c6564676572",
        write_uuid: "13d63400-2c97-6004-0002-4c6564676572",
        write_cmd_uuid: "13d63400-2c97-6004-0003-4c6564676572",
        notify_uuid: "13d63400-2c97-6004-0001-4c6564676572",
    }),
};

const FLEX: DeviceModel = DeviceModel {
    id: DeviceModelId::Flex,
    product_name: "Ledger Flex",
    usb_product_id: 0x70,
    memory_size: 1533 * 1024,
    block_size: 32,
    ble: Some(BleSpec {
        service_uuid: "13d63400-2c97-3004-0000-4c6564676572",
        write_uuid: "13d63400-2c97-3004-0002-4c6564676572",
        write_cmd_uuid: "13d63400-2c97-3004-0003-4c6564676572",
        notify_uuid: "13d63400-2c97-3004-0001-4c6564676572",
    }),
};

/// All known models
pub const DEVICE_MODELS: [DeviceModel; 5] = [NANO_S, NANO_SP, NANO_X, STAX, FLEX];

impl DeviceModel {
    /// Look up a model by id
    pub fn get(id: DeviceModelId) -> Self {
        match id {
            DeviceModelId::NanoS => NANO_S,
            DeviceModelId::NanoSp => NANO_SP,
            DeviceModelId::NanoX => NANO_X,
            DeviceModelId::Stax => STAX,
            DeviceModelId::Flex => FLEX,
        }
    }

    /// Look up a model from a full USB product id.
    ///
    /// Devices in application mode report `model << 8 | interfaces`, bootloader
    /// mode reports the bare model byte.
    pub fn from_usb_product_id(product_id: u16) -> Option<Self> {
        let model_byte = if product_id > 0xff {
            (product_id >> 8) as u8
        } else {
            product_id as u8
        };
        DEVICE_MODELS
            .into_iter()
            .find(|model| model.usb_product_id == model_byte)
    }

    /// Look up a model from an advertised BLE service UUID
    pub fn from_ble_service(service_uuid: &str) -> Option<Self> {
        DEVICE_MODELS.into_iter().find(|model| {
            model
                .ble
                .is_some_and(|ble| ble.service_uuid.eq_ignore_ascii_case(service_uuid))
        })
    }

    /// Whether the model can be reached over BLE
    pub const fn supports_ble(&self) -> bool {
        self.ble.is_some()
    }
}
