use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::serializer::{Reader, ReaderError, Serializer, Writer};

const OPERATOR_CMP: u8 = 0xff;
const OPERATOR_SUM: u8 = 0xfe;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    #[error("invalid script format {0}")]
    InvalidFormat(String),
    #[error("invalid script threshold {0} for {1} signers")]
    ThresholdNotMet(u8, usize),
}

/// Output script. The only supported family is the compact threshold form
/// `ff fe <t>`: at least `t` of the output keys must sign.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Script(#[serde(with = "hex")] pub Vec<u8>);

impl Script {
    pub fn empty() -> Self {
        Script(Vec::new())
    }

    pub fn new_threshold(threshold: u8) -> Self {
        Script(vec![OPERATOR_CMP, OPERATOR_SUM, threshold])
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn verify_format(&self) -> Result<(), ScriptError> {
        if self.0.len() != 3 || self.0[0] != OPERATOR_CMP || self.0[1] != OPERATOR_SUM {
            return Err(ScriptError::InvalidFormat(self.to_string()));
        }
        Ok(())
    }

    pub fn threshold(&self) -> Result<u8, ScriptError> {
        self.verify_format()?;
        Ok(self.0[2])
    }

    pub fn validate(&self, signers: usize) -> Result<(), ScriptError> {
        let threshold = self.threshold()?;
        if signers < threshold as usize {
            return Err(ScriptError::ThresholdNotMet(threshold, signers));
        }
        Ok(())
    }
}

impl Display for Script {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

impl Serializer for Script {
    fn write(&self, writer: &mut Writer) {
        writer.write_u16(self.0.len() as u16);
        writer.write_bytes(&self.0);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let len = reader.read_u16()? as usize;
        Ok(Script(reader.read_bytes(len)?))
    }

    fn size(&self) -> usize {
        2 + self.0.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_encoding() {
        let script = Script::new_threshold(64);
        assert_eq!(script.to_string(), "fffe40");
        assert_eq!(script.threshold().unwrap(), 64);
    }

    #[test]
    fn test_verify_format() {
        assert!(Script::new_threshold(1).verify_format().is_ok());
        assert!(Script::empty().verify_format().is_err());
        assert!(Script(vec![0xff, 0xfd, 1]).verify_format().is_err());
        assert!(Script(vec![0xff, 0xfe, 1, 1]).verify_format().is_err());
    }

    #[test]
    fn test_validate_signers() {
        let script = Script::new_threshold(2);
        assert!(script.validate(2).is_ok());
        assert!(script.validate(3).is_ok());
        assert_eq!(
            script.validate(1),
            Err(ScriptError::ThresholdNotMet(2, 1))
        );
    }
}
