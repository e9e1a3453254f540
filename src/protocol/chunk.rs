// Binary chunk payload header
//
// Every image chunk arrives with a 32-byte little-endian header in front
// of the data. Layout (offsets in bytes):
//
//   0   magic[8]              "OTAImage"
//   8   offset_to_data: u16   offset within the payload to the data
//   10  ota_image_type: u16   0 = single application image
//   12  update_version_major: u16
//   14  update_version_minor: u16
//   16  update_version_build: u16
//   18  total_size: u32       total size of the OTA image
//   22  image_offset: u32     offset of this chunk within the image
//   26  data_size: u16        size of the data in this payload
//   28  total_num_payloads: u16
//   30  this_payload_index: u16

use crate::error::OtaError;
use crate::version::FirmwareVersion;

pub const CHUNK_MAGIC: &[u8; 8] = b"OTAImage";
pub const CHUNK_HEADER_SIZE: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    pub offset_to_data: u16,
    pub ota_image_type: u16,
    pub update_version: FirmwareVersion,
    pub total_size: u32,
    pub image_offset: u32,
    pub data_size: u16,
    pub total_num_payloads: u16,
    pub this_payload_index: u16,
}

impl ChunkHeader {
    /// Decodes a chunk payload into its header and data slice.
    pub fn parse(payload: &[u8]) -> Result<(Self, &[u8]), OtaError> {
        if payload.len() < CHUNK_HEADER_SIZE {
            return Err(OtaError::MalformedDocument(format!(
                "chunk payload of {} bytes is shorter than the {} byte header",
                payload.len(),
                CHUNK_HEADER_SIZE
            )));
        }
        if &payload[0..8] != CHUNK_MAGIC {
            return Err(OtaError::MalformedDocument(
                "chunk payload magic mismatch".to_string(),
            ));
        }

        let u16_at = |at: usize| u16::from_le_bytes([payload[at], payload[at + 1]]);
        let u32_at = |at: usize| {
            u32::from_le_bytes([payload[at], payload[at + 1], payload[at + 2], payload[at + 3]])
        };

        let header = Self {
            offset_to_data: u16_at(8),
            ota_image_type: u16_at(10),
            update_version: FirmwareVersion::new(u16_at(12), u16_at(14), u16_at(16)),
            total_size: u32_at(18),
            image_offset: u32_at(22),
            data_size: u16_at(26),
            total_num_payloads: u16_at(28),
            this_payload_index: u16_at(30),
        };

        let data_start = header.offset_to_data as usize;
        let data_end = data_start + header.data_size as usize;
        if data_start < CHUNK_HEADER_SIZE || data_end > payload.len() {
            return Err(OtaError::MalformedDocument(format!(
                "chunk data range {}..{} escapes a {} byte payload",
                data_start,
                data_end,
                payload.len()
            )));
        }
        if header.image_offset as u64 + header.data_size as u64 > header.total_size as u64 {
            return Err(OtaError::MalformedDocument(
                "chunk data escapes the advertised image size".to_string(),
            ));
        }
        if header.this_payload_index >= header.total_num_payloads {
            return Err(OtaError::MalformedDocument(format!(
                "payload index {} out of {} payloads",
                header.this_payload_index, header.total_num_payloads
            )));
        }

        Ok((header, &payload[data_start..data_end]))
    }

    /// Encodes a full chunk payload, publisher side. Used by test
    /// doubles standing in for the publisher.
    pub fn encode(&self, data: &[u8]) -> Vec<u8> {
        let mut payload = Vec::with_capacity(CHUNK_HEADER_SIZE + data.len());
        payload.extend_from_slice(CHUNK_MAGIC);
        payload.extend_from_slice(&self.offset_to_data.to_le_bytes());
        payload.extend_from_slice(&self.ota_image_type.to_le_bytes());
        payload.extend_from_slice(&self.update_version.major.to_le_bytes());
        payload.extend_from_slice(&self.update_version.minor.to_le_bytes());
        payload.extend_from_slice(&self.update_version.build.to_le_bytes());
        payload.extend_from_slice(&self.total_size.to_le_bytes());
        payload.extend_from_slice(&self.image_offset.to_le_bytes());
        payload.extend_from_slice(&self.data_size.to_le_bytes());
        payload.extend_from_slice(&self.total_num_payloads.to_le_bytes());
        payload.extend_from_slice(&self.this_payload_index.to_le_bytes());
        payload.extend_from_slice(data);
        payload
    }

    /// Chunks an image into ready-to-publish payloads, the way the
    /// publisher script does.
    pub fn chunk_image(
        image: &[u8],
        chunk_size: usize,
        version: FirmwareVersion,
    ) -> Vec<Vec<u8>> {
        let total = image.len().div_ceil(chunk_size).max(1);
        image
            .chunks(chunk_size)
            .enumerate()
            .map(|(index, data)| {
                let header = ChunkHeader {
                    offset_to_data: CHUNK_HEADER_SIZE as u16,
                    ota_image_type: 0,
                    update_version: version,
                    total_size: image.len() as u32,
                    image_offset: (index * chunk_size) as u32,
                    data_size: data.len() as u16,
                    total_num_payloads: total as u16,
                    this_payload_index: index as u16,
                };
                header.encode(data)
            })
            .collect()
    }
}
