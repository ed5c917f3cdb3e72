//! Opaque typed payload container.
//!
//! An `AnyMessage` carries a type discriminator plus the CBOR encoding of the
//! payload. The bridge moves these around without looking inside; only the
//! producer and the final consumer unpack them, and unpacking checks the
//! discriminator before touching the bytes.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::codec::{cbor_decode, cbor_encode};
use crate::error::{VzError, VzResult};

/// A payload type that can travel inside an [`AnyMessage`].
pub trait TypedMessage: Serialize + DeserializeOwned {
    /// Stable type name written into the container.
    const TYPE_URL: &'static str;
}

/// Type-tagged opaque payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnyMessage {
    pub type_url: String,
    #[serde(with = "serde_bytes")]
    pub value: Vec<u8>,
}

impl AnyMessage {
    /// Pack a typed message into a container.
    pub fn pack<T: TypedMessage>(msg: &T) -> VzResult<Self> {
        Ok(Self {
            type_url: T::TYPE_URL.to_string(),
            value: cbor_encode(msg)?,
        })
    }

    /// Unpack the container as `T`.
    ///
    /// Fails with [`VzError::MalformedPayload`] when the declared type is not
    /// `T`, or when the bytes do not parse as `T`.
    pub fn unpack<T: TypedMessage>(&self) -> VzResult<T> {
        if !self.is::<T>() {
            return Err(VzError::MalformedPayload {
                expected: T::TYPE_URL.to_string(),
                found: self.type_url.clone(),
            });
        }
        cbor_decode(&self.value).map_err(|e| VzError::MalformedPayload {
            expected: T::TYPE_URL.to_string(),
            found: format!("unparseable bytes ({e})"),
        })
    }

    /// Whether the container declares type `T`.
    pub fn is<T: TypedMessage>(&self) -> bool {
        self.type_url == T::TYPE_URL
    }
}
