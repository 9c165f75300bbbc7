//! Walks a `Serialize` value and refuses NaN and infinite floats.
//!
//! `serde_json::to_value` renders those as `null`, which would let `inf`,
//! `-inf` and `None` share one claim key.

use serde::Serialize;
use serde::ser::{
    self, SerializeMap, SerializeSeq, SerializeStruct, SerializeStructVariant, SerializeTuple,
    SerializeTupleStruct, SerializeTupleVariant, Serializer,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub(crate) enum FiniteError {
    #[error("non-finite float")]
    NonFinite,

    /// The value's own `Serialize` impl failed.
    #[error("{0}")]
    Custom(String),
}

impl ser::Error for FiniteError {
    fn custom<T: std::fmt::Display>(msg: T) -> Self {
        FiniteError::Custom(msg.to_string())
    }
}

pub(crate) fn ensure_finite<T: Serialize + ?Sized>(value: &T) -> Result<(), FiniteError> {
    value.serialize(FiniteFloats)
}

fn check(finite: bool) -> Result<(), FiniteError> {
    if finite {
        Ok(())
    } else {
        Err(FiniteError::NonFinite)
    }
}

struct FiniteFloats;

impl Serializer for FiniteFloats {
    type Ok = ();
    type Error = FiniteError;
    type SerializeSeq = Self;
    type SerializeTuple = Self;
    type SerializeTupleStruct = Self;
    type SerializeTupleVariant = Self;
    type SerializeMap = Self;
    type SerializeStruct = Self;
    type SerializeStructVariant = Self;

    fn serialize_bool(self, _v: bool) -> Result<(), FiniteError> {
        Ok(())
    }

    fn serialize_i8(self, _v: i8) -> Result<(), FiniteError> {
        Ok(())
    }

    fn serialize_i16(self, _v: i16) -> Result<(), FiniteError> {
        Ok(())
    }

    fn serialize_i32(self, _v: i32) -> Result<(), FiniteError> {
        Ok(())
    }

    fn serialize_i64(self, _v: i64) -> Result<(), FiniteError> {
        Ok(())
    }

    fn serialize_i128(self, _v: i128) -> Result<(), FiniteError> {
        Ok(())
    }

    fn serialize_u8(self, _v: u8) -> Result<(), FiniteError> {
        Ok(())
    }

    fn serialize_u16(self, _v: u16) -> Result<(), FiniteError> {
        Ok(())
    }

    fn serialize_u32(self, _v: u32) -> Result<(), FiniteError> {
        Ok(())
    }

    fn serialize_u64(self, _v: u64) -> Result<(), FiniteError> {
        Ok(())
    }

    fn serialize_u128(self, _v: u128) -> Result<(), FiniteError> {
        Ok(())
    }

    fn serialize_f32(self, v: f32) -> Result<(), FiniteError> {
        check(v.is_finite())
    }

    fn serialize_f64(self, v: f64) -> Result<(), FiniteError> {
        check(v.is_finite())
    }

    fn serialize_char(self, _v: char) -> Result<(), FiniteError> {
        Ok(())
    }

    fn serialize_str(self, _v: &str) -> Result<(), FiniteError> {
        Ok(())
    }

    fn serialize_bytes(self, _v: &[u8]) -> Result<(), FiniteError> {
        Ok(())
    }

    fn serialize_none(self) -> Result<(), FiniteError> {
        Ok(())
    }

    fn serialize_some<T: ?Sized + Serialize>(self, value: &T) -> Result<(), FiniteError> {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<(), FiniteError> {
        Ok(())
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<(), FiniteError> {
        Ok(())
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
    ) -> Result<(), FiniteError> {
        Ok(())
    }

    fn serialize_newtype_struct<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Result<(), FiniteError> {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        value: &T,
    ) -> Result<(), FiniteError> {
        value.serialize(self)
    }

    fn serialize_seq(self, _len: Option<usize>) -> Result<Self, FiniteError> {
        Ok(self)
    }

    fn serialize_tuple(self, _len: usize) -> Result<Self, FiniteError> {
        Ok(self)
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<Self, FiniteError> {
        Ok(self)
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self, FiniteError> {
        Ok(self)
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<Self, FiniteError> {
        Ok(self)
    }

    fn serialize_struct(self, _name: &'static str, _len: usize) -> Result<Self, FiniteError> {
        Ok(self)
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self, FiniteError> {
        Ok(self)
    }
}

impl SerializeSeq for FiniteFloats {
    type Ok = ();
    type Error = FiniteError;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), FiniteError> {
        value.serialize(FiniteFloats)
    }

    fn end(self) -> Result<(), FiniteError> {
        Ok(())
    }
}

impl SerializeTuple for FiniteFloats {
    type Ok = ();
    type Error = FiniteError;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), FiniteError> {
        value.serialize(FiniteFloats)
    }

    fn end(self) -> Result<(), FiniteError> {
        Ok(())
    }
}

impl SerializeTupleStruct for FiniteFloats {
    type Ok = ();
    type Error = FiniteError;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), FiniteError> {
        value.serialize(FiniteFloats)
    }

    fn end(self) -> Result<(), FiniteError> {
        Ok(())
    }
}

impl SerializeTupleVariant for FiniteFloats {
    type Ok = ();
    type Error = FiniteError;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), FiniteError> {
        value.serialize(FiniteFloats)
    }

    fn end(self) -> Result<(), FiniteError> {
        Ok(())
    }
}

impl SerializeMap for FiniteFloats {
    type Ok = ();
    type Error = FiniteError;

    fn serialize_key<T: ?Sized + Serialize>(&mut self, key: &T) -> Result<(), FiniteError> {
        key.serialize(FiniteFloats)
    }

    fn serialize_value<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), FiniteError> {
        value.serialize(FiniteFloats)
    }

    fn end(self) -> Result<(), FiniteError> {
        Ok(())
    }
}

impl SerializeStruct for FiniteFloats {
    type Ok = ();
    type Error = FiniteError;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        _key: &'static str,
        value: &T,
    ) -> Result<(), FiniteError> {
        value.serialize(FiniteFloats)
    }

    fn end(self) -> Result<(), FiniteError> {
        Ok(())
    }
}

impl SerializeStructVariant for FiniteFloats {
    type Ok = ();
    type Error = FiniteError;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        _key: &'static str,
        value: &T,
    ) -> Result<(), FiniteError> {
        value.serialize(FiniteFloats)
    }

    fn end(self) -> Result<(), FiniteError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[derive(Serialize)]
    struct Reading {
        sensor: &'static str,
        value: Option<f32>,
    }

    #[test]
    fn finite_values_pass() {
        assert!(ensure_finite(&(1.5f64, -0.0f32, "x", None::<f64>)).is_ok());
        assert!(ensure_finite(&f64::MAX).is_ok());
    }

    #[test]
    fn non_finite_floats_are_found_anywhere() {
        assert!(matches!(ensure_finite(&f64::NAN), Err(FiniteError::NonFinite)));
        assert!(matches!(
            ensure_finite(&vec![1.0, f64::NEG_INFINITY]),
            Err(FiniteError::NonFinite)
        ));

        let reading = Reading {
            sensor: "t1",
            value: Some(f32::INFINITY),
        };
        assert!(matches!(ensure_finite(&reading), Err(FiniteError::NonFinite)));

        let mut by_name = BTreeMap::new();
        by_name.insert("rate", f64::NAN);
        assert!(matches!(ensure_finite(&by_name), Err(FiniteError::NonFinite)));
    }
}
