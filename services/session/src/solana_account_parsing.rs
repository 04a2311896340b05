//! Account data parsing utilities for Solana accounts
//!
//! Anchor accounts have an 8-byte discriminator prefix followed by packed
//! little-endian fields. Decoding never zero-fills: a buffer shorter than the
//! record's exact length is a `DecodeError`.

use shared::errors::{Result, SessionError};
use shared::types::{Allowance, AllowanceNonceRegistry, Casino, RateLimiter, Vault};
use solana_sdk::hash::hash;
use solana_sdk::pubkey::Pubkey;

/// Anchor account discriminator: sha256("account:<Name>")[0..8]
pub fn account_discriminator(name: &str) -> [u8; 8] {
    let digest = hash(format!("account:{}", name).as_bytes()).to_bytes();
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[..8]);
    out
}

/// Sequential little-endian field reader over a length-checked buffer
pub struct FieldReader<'a> {
    record: &'static str,
    data: &'a [u8],
    offset: usize,
}

impl<'a> FieldReader<'a> {
    fn new(record: &'static str, data: &'a [u8], offset: usize) -> Self {
        Self { record, data, offset }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.offset + len;
        let bytes = self
            .data
            .get(self.offset..end)
            .ok_or_else(|| SessionError::decode(self.record, self.data.len(), end))?;
        self.offset = end;
        Ok(bytes)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        buf.copy_from_slice(self.take(N)?);
        Ok(buf)
    }

    pub fn pubkey(&mut self) -> Result<Pubkey> {
        Ok(Pubkey::new_from_array(self.array::<32>()?))
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.array::<1>()?[0])
    }

    pub fn bool(&mut self) -> Result<bool> {
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(SessionError::new(
                shared::errors::ErrorKind::DecodeError,
                format!("Failed to decode {} account", self.record),
            )
            .with_context(format!(
                "invalid bool byte {} at offset {}",
                other,
                self.offset - 1
            ))),
        }
    }

    pub fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    pub fn i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.array()?))
    }
}

/// A fixed-layout on-chain record
pub trait AccountRecord: Sized {
    /// Anchor account name, used for the discriminator
    const NAME: &'static str;
    /// Exact serialized length including the discriminator
    const LEN: usize;

    fn read_fields(reader: &mut FieldReader<'_>) -> Result<Self>;
    fn write_fields(&self, out: &mut Vec<u8>);
}

/// Decode a record, verifying length and discriminator
pub fn decode_account<T: AccountRecord>(data: &[u8]) -> Result<T> {
    if data.len() < T::LEN {
        return Err(SessionError::decode(T::NAME, data.len(), T::LEN));
    }

    let expected = account_discriminator(T::NAME);
    if data[..8] != expected {
        return Err(SessionError::new(
            shared::errors::ErrorKind::DecodeError,
            format!("Failed to decode {} account", T::NAME),
        )
        .with_context(format!(
            "discriminator mismatch: got {:?}, expected {:?}",
            &data[..8],
            expected
        )));
    }

    let mut reader = FieldReader::new(T::NAME, data, 8);
    T::read_fields(&mut reader)
}

/// Encode a record with its discriminator
pub fn encode_account<T: AccountRecord>(record: &T) -> Vec<u8> {
    let mut out = Vec::with_capacity(T::LEN);
    out.extend_from_slice(&account_discriminator(T::NAME));
    record.write_fields(&mut out);
    out
}

impl AccountRecord for Casino {
    const NAME: &'static str = "Casino";
    const LEN: usize = Casino::LEN;

    fn read_fields(r: &mut FieldReader<'_>) -> Result<Self> {
        Ok(Self {
            authority: r.pubkey()?,
            processor: r.pubkey()?,
            treasury: r.pubkey()?,
            bump: r.u8()?,
            vault_authority_bump: r.u8()?,
            paused: r.bool()?,
            total_bets: r.u64()?,
            total_volume: r.u64()?,
            created_at: r.i64()?,
        })
    }

    fn write_fields(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.authority.as_ref());
        out.extend_from_slice(self.processor.as_ref());
        out.extend_from_slice(self.treasury.as_ref());
        out.push(self.bump);
        out.push(self.vault_authority_bump);
        out.push(self.paused as u8);
        out.extend_from_slice(&self.total_bets.to_le_bytes());
        out.extend_from_slice(&self.total_volume.to_le_bytes());
        out.extend_from_slice(&self.created_at.to_le_bytes());
    }
}

impl AccountRecord for Vault {
    const NAME: &'static str = "Vault";
    const LEN: usize = Vault::LEN;

    fn read_fields(r: &mut FieldReader<'_>) -> Result<Self> {
        Ok(Self {
            owner: r.pubkey()?,
            casino: r.pubkey()?,
            bump: r.u8()?,
            sol_balance: r.u64()?,
            created_at: r.i64()?,
            last_activity: r.i64()?,
        })
    }

    fn write_fields(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.owner.as_ref());
        out.extend_from_slice(self.casino.as_ref());
        out.push(self.bump);
        out.extend_from_slice(&self.sol_balance.to_le_bytes());
        out.extend_from_slice(&self.created_at.to_le_bytes());
        out.extend_from_slice(&self.last_activity.to_le_bytes());
    }
}

impl AccountRecord for AllowanceNonceRegistry {
    const NAME: &'static str = "AllowanceNonceRegistry";
    const LEN: usize = AllowanceNonceRegistry::LEN;

    fn read_fields(r: &mut FieldReader<'_>) -> Result<Self> {
        Ok(Self {
            user: r.pubkey()?,
            casino: r.pubkey()?,
            next_nonce: r.u64()?,
            bump: r.u8()?,
        })
    }

    fn write_fields(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.user.as_ref());
        out.extend_from_slice(self.casino.as_ref());
        out.extend_from_slice(&self.next_nonce.to_le_bytes());
        out.push(self.bump);
    }
}

impl AccountRecord for Allowance {
    const NAME: &'static str = "Allowance";
    const LEN: usize = Allowance::LEN;

    fn read_fields(r: &mut FieldReader<'_>) -> Result<Self> {
        Ok(Self {
            user: r.pubkey()?,
            casino: r.pubkey()?,
            token_mint: r.pubkey()?,
            amount: r.u64()?,
            spent: r.u64()?,
            expires_at: r.i64()?,
            created_at: r.i64()?,
            nonce: r.u64()?,
            revoked: r.bool()?,
            bump: r.u8()?,
            last_spent_at: r.i64()?,
            spend_count: r.u32()?,
        })
    }

    fn write_fields(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.user.as_ref());
        out.extend_from_slice(self.casino.as_ref());
        out.extend_from_slice(self.token_mint.as_ref());
        out.extend_from_slice(&self.amount.to_le_bytes());
        out.extend_from_slice(&self.spent.to_le_bytes());
        out.extend_from_slice(&self.expires_at.to_le_bytes());
        out.extend_from_slice(&self.created_at.to_le_bytes());
        out.extend_from_slice(&self.nonce.to_le_bytes());
        out.push(self.revoked as u8);
        out.push(self.bump);
        out.extend_from_slice(&self.last_spent_at.to_le_bytes());
        out.extend_from_slice(&self.spend_count.to_le_bytes());
    }
}

impl AccountRecord for RateLimiter {
    const NAME: &'static str = "RateLimiter";
    const LEN: usize = RateLimiter::LEN;

    fn read_fields(r: &mut FieldReader<'_>) -> Result<Self> {
        Ok(Self {
            user: r.pubkey()?,
            approvals_count: r.u8()?,
            window_start: r.i64()?,
            bump: r.u8()?,
        })
    }

    fn write_fields(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.user.as_ref());
        out.push(self.approvals_count);
        out.extend_from_slice(&self.window_start.to_le_bytes());
        out.push(self.bump);
    }
}

/// Parse the next_nonce from allowance nonce registry account data
pub fn parse_allowance_nonce_registry_next_nonce(data: &[u8]) -> Result<u64> {
    decode_account::<AllowanceNonceRegistry>(data).map(|registry| registry.next_nonce)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::errors::ErrorKind;

    fn sample_allowance(amount: u64, nonce: u64) -> Allowance {
        Allowance {
            user: Pubkey::new_unique(),
            casino: Pubkey::new_unique(),
            token_mint: Pubkey::default(),
            amount,
            spent: 0,
            expires_at: i64::MAX,
            created_at: 1_700_000_000,
            nonce,
            revoked: false,
            bump: 254,
            last_spent_at: 0,
            spend_count: 0,
        }
    }

    #[test]
    fn test_parse_allowance_nonce_registry_next_nonce() {
        let registry = AllowanceNonceRegistry {
            user: Pubkey::new_unique(),
            casino: Pubkey::new_unique(),
            next_nonce: 42,
            bump: 255,
        };
        let data = encode_account(&registry);
        assert_eq!(data.len(), 81);

        // next_nonce sits at offset 72 (8+32+32)
        assert_eq!(&data[72..80], &42u64.to_le_bytes());
        assert_eq!(parse_allowance_nonce_registry_next_nonce(&data).unwrap(), 42);
    }

    #[test]
    fn test_parse_allowance_nonce_registry_next_nonce_short_data() {
        let short_data = vec![0u8; 50];
        let err = parse_allowance_nonce_registry_next_nonce(&short_data).unwrap_err();
        assert_eq!(err.kind, ErrorKind::DecodeError);
    }

    #[test]
    fn test_allowance_round_trip_at_boundaries() {
        for (amount, nonce) in [(0, 0), (u64::MAX, u64::MAX)] {
            let record = sample_allowance(amount, nonce);
            let data = encode_account(&record);
            assert_eq!(data.len(), Allowance::LEN);
            assert_eq!(decode_account::<Allowance>(&data).unwrap(), record);
        }
    }

    #[test]
    fn test_casino_and_vault_round_trip() {
        let casino = Casino {
            authority: Pubkey::new_unique(),
            processor: Pubkey::new_unique(),
            treasury: Pubkey::new_unique(),
            bump: 1,
            vault_authority_bump: 2,
            paused: true,
            total_bets: u64::MAX,
            total_volume: 0,
            created_at: -1,
        };
        assert_eq!(decode_account::<Casino>(&encode_account(&casino)).unwrap(), casino);

        let vault = Vault {
            owner: Pubkey::new_unique(),
            casino: Pubkey::new_unique(),
            bump: 9,
            sol_balance: 5_000_000_000,
            created_at: 10,
            last_activity: 20,
        };
        assert_eq!(decode_account::<Vault>(&encode_account(&vault)).unwrap(), vault);
    }

    #[test]
    fn test_every_truncation_is_rejected() {
        let data = encode_account(&sample_allowance(10, 1));
        for len in 0..Allowance::LEN {
            let err = decode_account::<Allowance>(&data[..len]).unwrap_err();
            assert_eq!(err.kind, ErrorKind::DecodeError, "len {}", len);
        }
    }

    #[test]
    fn test_wrong_discriminator_is_rejected() {
        let vault = Vault {
            owner: Pubkey::new_unique(),
            casino: Pubkey::new_unique(),
            bump: 1,
            sol_balance: 0,
            created_at: 0,
            last_activity: 0,
        };
        let mut data = encode_account(&vault);
        data.resize(Allowance::LEN, 0);
        let err = decode_account::<Allowance>(&data).unwrap_err();
        assert_eq!(err.kind, ErrorKind::DecodeError);
        assert!(err.to_string().contains("discriminator"));
    }

    #[test]
    fn test_invalid_bool_byte_is_rejected() {
        let mut data = encode_account(&sample_allowance(1, 1));
        // revoked flag offset: 8 + 32*3 + 8*5
        data[144] = 7;
        let err = decode_account::<Allowance>(&data).unwrap_err();
        assert_eq!(err.kind, ErrorKind::DecodeError);
    }

    #[test]
    fn test_trailing_bytes_are_ignored() {
        let record = sample_allowance(3, 3);
        let mut data = encode_account(&record);
        data.extend_from_slice(&[0xAA; 16]);
        assert_eq!(decode_account::<Allowance>(&data).unwrap(), record);
    }
}
