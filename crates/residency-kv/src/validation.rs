//! Validation of write commands against fixed size limits.

use crate::KeyValueStoreError;
use crate::constants::MAX_KEY_SIZE;
use crate::constants::MAX_VALUE_SIZE;
use crate::kv::WriteCommand;

/// Validate a write command against fixed size limits.
pub fn validate_write_command(command: &WriteCommand) -> Result<(), KeyValueStoreError> {
    check_key(command.key())?;
    match command {
        WriteCommand::Set { value, .. } => check_value(value),
        WriteCommand::CompareAndSwap { new_value, .. } => check_value(new_value),
        WriteCommand::CompareAndDelete { .. } => Ok(()),
    }
}

fn check_key(key: &str) -> Result<(), KeyValueStoreError> {
    if key.is_empty() {
        return Err(KeyValueStoreError::EmptyKey);
    }
    if key.len() > MAX_KEY_SIZE as usize {
        return Err(KeyValueStoreError::KeyTooLarge {
            size: key.len() as u32,
            max: MAX_KEY_SIZE,
        });
    }
    Ok(())
}

fn check_value(value: &str) -> Result<(), KeyValueStoreError> {
    if value.len() > MAX_VALUE_SIZE as usize {
        return Err(KeyValueStoreError::ValueTooLarge {
            size: value.len() as u32,
            max: MAX_VALUE_SIZE,
        });
    }
    Ok(())
}
