//! Message header and codec for the legacy STUN dialect.

use crate::attribute::{
    ErrorCode, StunAddress, StunAttribute, ATTR_DATA, ATTR_ERROR_CODE, ATTR_MAPPED_ADDRESS,
    ATTR_OPTIONS, ATTR_SOURCE_ADDRESS2,
};
use crate::error::StunError;
use rand::RngCore;

/// Size of the fixed message header: type, length, 16-byte transaction ID.
pub const HEADER_SIZE: usize = 20;

/// A 16-byte transaction identifier (the legacy dialect predates the
/// 12-byte-ID-plus-cookie header layout).
pub type TransactionId = [u8; 16];

/// Message types of the relay dialect.
///
/// Responses are the request type with bit 8 set; error responses
/// additionally set bit 4. Types outside the relay set are preserved as
/// [`MessageType::Other`] so the demultiplexer can log and drop them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// Allocate request (0x0003)
    AllocateRequest,
    /// Allocate success response (0x0103)
    AllocateResponse,
    /// Allocate error response (0x0113)
    AllocateErrorResponse,
    /// Send request (0x0004)
    SendRequest,
    /// Send success response (0x0104)
    SendResponse,
    /// Send error response (0x0114)
    SendErrorResponse,
    /// Data indication (0x0115)
    DataIndication,
    /// Any other type value
    Other(u16),
}

impl MessageType {
    /// The wire value of this type.
    #[must_use]
    pub fn as_u16(self) -> u16 {
        match self {
            Self::AllocateRequest => 0x0003,
            Self::AllocateResponse => 0x0103,
            Self::AllocateErrorResponse => 0x0113,
            Self::SendRequest => 0x0004,
            Self::SendResponse => 0x0104,
            Self::SendErrorResponse => 0x0114,
            Self::DataIndication => 0x0115,
            Self::Other(v) => v,
        }
    }

    /// Map a wire value to a type.
    #[must_use]
    pub fn from_u16(value: u16) -> Self {
        match value {
            0x0003 => Self::AllocateRequest,
            0x0103 => Self::AllocateResponse,
            0x0113 => Self::AllocateErrorResponse,
            0x0004 => Self::SendRequest,
            0x0104 => Self::SendResponse,
            0x0114 => Self::SendErrorResponse,
            0x0115 => Self::DataIndication,
            other => Self::Other(other),
        }
    }

    /// The success-response type corresponding to this request type.
    #[must_use]
    pub fn success_response(self) -> Self {
        Self::from_u16(self.as_u16() | 0x0100)
    }

    /// The error-response type corresponding to this request type.
    #[must_use]
    pub fn error_response(self) -> Self {
        Self::from_u16(self.as_u16() | 0x0110)
    }
}

/// A STUN message: type, transaction ID, and an ordered attribute list.
///
/// Attribute order is preserved on both encode and decode; the relay framing
/// relies on the magic cookie being the first attribute written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StunMessage {
    msg_type: MessageType,
    transaction_id: TransactionId,
    attributes: Vec<StunAttribute>,
}

impl StunMessage {
    /// Create a message with a fresh random transaction ID.
    #[must_use]
    pub fn new(msg_type: MessageType) -> Self {
        let mut transaction_id = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut transaction_id);
        Self {
            msg_type,
            transaction_id,
            attributes: Vec::new(),
        }
    }

    /// Replace the transaction ID, e.g. to answer a captured request.
    #[must_use]
    pub fn with_transaction_id(mut self, transaction_id: TransactionId) -> Self {
        self.transaction_id = transaction_id;
        self
    }

    /// The message type.
    #[must_use]
    pub fn msg_type(&self) -> MessageType {
        self.msg_type
    }

    /// The transaction ID.
    #[must_use]
    pub fn transaction_id(&self) -> &TransactionId {
        &self.transaction_id
    }

    /// The decoded attributes, in wire order.
    #[must_use]
    pub fn attributes(&self) -> &[StunAttribute] {
        &self.attributes
    }

    /// Append an attribute.
    pub fn add_attribute(&mut self, attribute: StunAttribute) {
        self.attributes.push(attribute);
    }

    /// Encode the message, header first, attributes in insertion order.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_SIZE + 64);
        out.extend_from_slice(&self.msg_type.as_u16().to_be_bytes());
        out.extend_from_slice(&[0, 0]);
        out.extend_from_slice(&self.transaction_id);
        for attribute in &self.attributes {
            attribute.encode(&mut out);
        }
        let len = (out.len() - HEADER_SIZE) as u16;
        out[2..4].copy_from_slice(&len.to_be_bytes());
        out
    }

    /// Decode a message.
    ///
    /// # Errors
    ///
    /// Returns [`StunError`] when the input is shorter than the header, the
    /// declared length overruns the buffer, or an attribute is malformed.
    /// Trailing bytes beyond the declared length are ignored.
    pub fn decode(data: &[u8]) -> Result<Self, StunError> {
        if data.len() < HEADER_SIZE {
            return Err(StunError::TooShort(data.len()));
        }
        let msg_type = MessageType::from_u16(u16::from_be_bytes([data[0], data[1]]));
        let declared = usize::from(u16::from_be_bytes([data[2], data[3]]));
        let available = data.len() - HEADER_SIZE;
        if declared > available {
            return Err(StunError::Truncated {
                declared,
                available,
            });
        }
        let mut transaction_id = [0u8; 16];
        transaction_id.copy_from_slice(&data[4..HEADER_SIZE]);

        let body = &data[HEADER_SIZE..HEADER_SIZE + declared];
        let mut attributes = Vec::new();
        let mut offset = 0;
        while offset < body.len() {
            if offset + 4 > body.len() {
                return Err(StunError::TruncatedAttribute(0));
            }
            let attr_type = u16::from_be_bytes([body[offset], body[offset + 1]]);
            let attr_len = usize::from(u16::from_be_bytes([body[offset + 2], body[offset + 3]]));
            offset += 4;
            if offset + attr_len > body.len() {
                return Err(StunError::TruncatedAttribute(attr_type));
            }
            attributes.push(StunAttribute::decode(
                attr_type,
                &body[offset..offset + attr_len],
            )?);
            offset += attr_len;
        }

        Ok(Self {
            msg_type,
            transaction_id,
            attributes,
        })
    }

    fn find(&self, attr_type: u16) -> Option<&StunAttribute> {
        self.attributes.iter().find(|a| a.attr_type() == attr_type)
    }

    /// The MAPPED-ADDRESS attribute, if present.
    #[must_use]
    pub fn mapped_address(&self) -> Option<&StunAddress> {
        match self.find(ATTR_MAPPED_ADDRESS) {
            Some(StunAttribute::MappedAddress(a)) => Some(a),
            _ => None,
        }
    }

    /// The SOURCE-ADDRESS2 attribute, if present.
    #[must_use]
    pub fn source_address2(&self) -> Option<&StunAddress> {
        match self.find(ATTR_SOURCE_ADDRESS2) {
            Some(StunAttribute::SourceAddress2(a)) => Some(a),
            _ => None,
        }
    }

    /// The DATA attribute, if present.
    #[must_use]
    pub fn data(&self) -> Option<&[u8]> {
        match self.find(ATTR_DATA) {
            Some(StunAttribute::Data(b)) => Some(b),
            _ => None,
        }
    }

    /// The OPTIONS attribute, if present.
    #[must_use]
    pub fn options(&self) -> Option<u32> {
        match self.find(ATTR_OPTIONS) {
            Some(StunAttribute::Options(v)) => Some(*v),
            _ => None,
        }
    }

    /// The ERROR-CODE attribute, if present.
    #[must_use]
    pub fn error_code(&self) -> Option<&ErrorCode> {
        match self.find(ATTR_ERROR_CODE) {
            Some(StunAttribute::ErrorCode(e)) => Some(e),
            _ => None,
        }
    }
}
