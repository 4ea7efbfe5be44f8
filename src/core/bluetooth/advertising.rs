//! Advertising and scan response payloads.
//! Encodes the fields we care about into length-type-value AD structures.

use serde::{Deserialize, Serialize};

use crate::core::bluetooth::constants::MAX_ADV_DATA_LEN;
use crate::core::bluetooth::error::BleError;

const AD_FLAGS: u8 = 0x01;
const AD_COMPLETE_16BIT_UUIDS: u8 = 0x03;
const AD_SHORT_LOCAL_NAME: u8 = 0x08;
const AD_COMPLETE_LOCAL_NAME: u8 = 0x09;
const AD_TX_POWER_LEVEL: u8 = 0x0A;
const AD_MANUFACTURER_DATA: u8 = 0xFF;

/// LE General Discoverable, BR/EDR not supported
pub const FLAGS_GENERAL_DISCOVERABLE: u8 = 0x06;

/// Fields of an advertising or scan response payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvertisingData {
    pub flags: Option<u8>,
    pub tx_power_level: Option<i8>,
    pub complete_local_name: Option<String>,
    pub short_local_name: Option<String>,
    pub service_uuids_16: Vec<u16>,
    pub manufacturer_data: Option<(u16, Vec<u8>)>,
}

impl AdvertisingData {
    /// Payload with only a TX power level, as advertised by the reference peripheral.
    pub fn with_tx_power(level: i8) -> Self {
        Self {
            tx_power_level: Some(level),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Encodes the payload, failing if it does not fit in one legacy PDU.
    pub fn encode(&self) -> Result<Vec<u8>, BleError> {
        let mut out = Vec::with_capacity(MAX_ADV_DATA_LEN);

        if let Some(flags) = self.flags {
            push_field(&mut out, AD_FLAGS, &[flags]);
        }
        if let Some(level) = self.tx_power_level {
            push_field(&mut out, AD_TX_POWER_LEVEL, &level.to_le_bytes());
        }
        if !self.service_uuids_16.is_empty() {
            let uuids: Vec<u8> = self
                .service_uuids_16
                .iter()
                .flat_map(|uuid| uuid.to_le_bytes())
                .collect();
            push_field(&mut out, AD_COMPLETE_16BIT_UUIDS, &uuids);
        }
        if let Some(name) = &self.short_local_name {
            push_field(&mut out, AD_SHORT_LOCAL_NAME, name.as_bytes());
        }
        if let Some(name) = &self.complete_local_name {
            push_field(&mut out, AD_COMPLETE_LOCAL_NAME, name.as_bytes());
        }
        if let Some((company, data)) = &self.manufacturer_data {
            let mut body = company.to_le_bytes().to_vec();
            body.extend_from_slice(data);
            push_field(&mut out, AD_MANUFACTURER_DATA, &body);
        }

        if out.len() > MAX_ADV_DATA_LEN {
            return Err(BleError::InvalidParameter(format!(
                "payload is {} bytes, capacity is {}",
                out.len(),
                MAX_ADV_DATA_LEN
            )));
        }
        Ok(out)
    }
}

fn push_field(out: &mut Vec<u8>, ad_type: u8, body: &[u8]) {
    // A field longer than 254 bytes can never fit; the length check in
    // `encode` rejects it afterwards.
    out.push(body.len().saturating_add(1).min(u8::MAX as usize) as u8);
    out.push(ad_type);
    out.extend_from_slice(body);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tx_power_only() {
        let bytes = AdvertisingData::with_tx_power(20).encode().unwrap();
        assert_eq!(bytes, vec![0x02, AD_TX_POWER_LEVEL, 20]);
    }

    #[test]
    fn empty_payload_encodes_to_nothing() {
        let data = AdvertisingData::default();
        assert!(data.is_empty());
        assert!(data.encode().unwrap().is_empty());
    }

    #[test]
    fn negative_tx_power_is_twos_complement() {
        let bytes = AdvertisingData::with_tx_power(-4).encode().unwrap();
        assert_eq!(bytes[2], 0xFC);
    }

    #[test]
    fn fields_are_laid_out_in_order() {
        let data = AdvertisingData {
            flags: Some(FLAGS_GENERAL_DISCOVERABLE),
            complete_local_name: Some("periph".into()),
            service_uuids_16: vec![0x180F],
            ..AdvertisingData::default()
        };
        let bytes = data.encode().unwrap();
        assert_eq!(
            bytes,
            vec![
                0x02, AD_FLAGS, 0x06, //
                0x03, AD_COMPLETE_16BIT_UUIDS, 0x0F, 0x18, //
                0x07, AD_COMPLETE_LOCAL_NAME, b'p', b'e', b'r', b'i', b'p', b'h',
            ]
        );
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let data = AdvertisingData {
            complete_local_name: Some("a name far too long for one advertising packet".into()),
            ..AdvertisingData::default()
        };
        assert!(matches!(data.encode(), Err(BleError::InvalidParameter(_))));
    }
}
