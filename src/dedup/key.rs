use std::fmt::{self, Write as _};

use blake3::Hasher;
use serde::Serialize;
use serde_json::Value;

use crate::common::{DEFAULT_NAMESPACE, DIGEST_HEX_LEN, KEY_SEPARATOR, MAX_ARGUMENT_DEPTH};
use crate::dedup::error::KeyDerivationError;
use crate::dedup::finite::{FiniteError, ensure_finite};

/// Ordered argument vector of one invocation.
///
/// Every argument is captured structurally when it is pushed, so two values
/// that serialize the same produce the same key no matter where they live in
/// memory or in which order their map entries were inserted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Arguments {
    values: Vec<Value>,
}

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<T: Serialize + ?Sized>(&mut self, arg: &T) -> Result<(), KeyDerivationError> {
        let index = self.values.len();
        // Serialize failures fall through so `to_value` reports them with its own error.
        if let Err(FiniteError::NonFinite) = ensure_finite(arg) {
            return Err(KeyDerivationError::NonFinite { index });
        }
        let value = serde_json::to_value(arg)
            .map_err(|source| KeyDerivationError::Unserializable { index, source })?;
        self.values.push(value);
        Ok(())
    }

    /// Builder form of [`Arguments::push`].
    pub fn with<T: Serialize + ?Sized>(mut self, arg: &T) -> Result<Self, KeyDerivationError> {
        self.push(arg)?;
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }
}

impl From<Vec<Value>> for Arguments {
    fn from(values: Vec<Value>) -> Self {
        Self { values }
    }
}

/// Claim key laid out as `<namespace>_<operation>_<digest>`.
///
/// The namespace never contains the separator and the digest has a fixed
/// width, so the operation part is recovered exactly even when it contains
/// `_` itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey(String);

impl DedupKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn digest(&self) -> &str {
        &self.0[self.0.len() - DIGEST_HEX_LEN..]
    }

    pub fn namespace(&self) -> &str {
        self.0
            .split_once(KEY_SEPARATOR)
            .map(|(namespace, _)| namespace)
            .unwrap_or_default()
    }

    pub fn operation_id(&self) -> &str {
        let start = self.namespace().len() + KEY_SEPARATOR.len_utf8();
        let end = self.0.len() - DIGEST_HEX_LEN - KEY_SEPARATOR.len_utf8();
        &self.0[start..end]
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derives claim keys under one fixed namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyDeriver {
    namespace: String,
}

impl Default for KeyDeriver {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }
}

impl KeyDeriver {
    pub fn new(namespace: impl Into<String>) -> Result<Self, KeyDerivationError> {
        let namespace = namespace.into();
        if namespace.is_empty() || namespace.contains(KEY_SEPARATOR) {
            return Err(KeyDerivationError::InvalidNamespace(namespace));
        }
        Ok(Self { namespace })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn derive(
        &self,
        operation_id: &str,
        args: &Arguments,
    ) -> Result<DedupKey, KeyDerivationError> {
        derive_key(&self.namespace, operation_id, args)
    }
}

/// Builds the claim key of `operation_id` called with `args`.
///
/// Arguments are rendered canonically, framed with their byte length and
/// hashed with BLAKE3. Length framing means no argument content can imitate
/// an argument boundary.
pub fn derive_key(
    namespace: &str,
    operation_id: &str,
    args: &Arguments,
) -> Result<DedupKey, KeyDerivationError> {
    if operation_id.is_empty() {
        return Err(KeyDerivationError::EmptyOperation);
    }

    let mut hasher = Hasher::new();
    hasher.update(&(args.len() as u64).to_le_bytes());

    let mut encoded = String::new();
    for (index, value) in args.values().iter().enumerate() {
        encoded.clear();
        write_canonical(value, 0, index, &mut encoded)?;
        hasher.update(&(encoded.len() as u64).to_le_bytes());
        hasher.update(encoded.as_bytes());
    }
    let digest = hasher.finalize().to_hex();

    let mut key = String::with_capacity(
        namespace.len() + operation_id.len() + DIGEST_HEX_LEN + 2 * KEY_SEPARATOR.len_utf8(),
    );
    key.push_str(namespace);
    key.push(KEY_SEPARATOR);
    key.push_str(operation_id);
    key.push(KEY_SEPARATOR);
    key.push_str(digest.as_str());
    Ok(DedupKey(key))
}

fn write_canonical(
    value: &Value,
    depth: usize,
    index: usize,
    out: &mut String,
) -> Result<(), KeyDerivationError> {
    if depth > MAX_ARGUMENT_DEPTH {
        return Err(KeyDerivationError::TooDeep {
            index,
            limit: MAX_ARGUMENT_DEPTH,
        });
    }

    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(flag) => out.push_str(if *flag { "true" } else { "false" }),
        Value::Number(number) => {
            let _ = write!(out, "{}", number);
        }
        // Display on a string value yields its escaped, quoted JSON form.
        Value::String(_) => {
            let _ = write!(out, "{}", value);
        }
        Value::Array(items) => {
            out.push('[');
            for (position, item) in items.iter().enumerate() {
                if position > 0 {
                    out.push(',');
                }
                write_canonical(item, depth + 1, index, out)?;
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_unstable_by(|(a, _), (b, _)| a.as_bytes().cmp(b.as_bytes()));

            out.push('{');
            for (position, (field, item)) in entries.into_iter().enumerate() {
                if position > 0 {
                    out.push(',');
                }
                let _ = write!(out, "{}", Value::from(field.as_str()));
                out.push(':');
                write_canonical(item, depth + 1, index, out)?;
            }
            out.push('}');
        }
    }
    Ok(())
}
