/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types that exist only to store bytes, and do not have any major "active" behavior.

use std::{
    fmt::{self, Debug, Display, Formatter},
    hash::Hash,
    ops::{Add, AddAssign, Sub},
    time::{Duration, SystemTime},
};

use borsh::{BorshDeserialize, BorshSerialize};

/// Number that uniquely identifies a ledger network.
///
/// Every proposal and validation carries the `NetworkID` of the network it was produced for, so that
/// a validator that operates on two networks with the same key cannot have its messages replayed from
/// one network onto the other.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, BorshDeserialize, BorshSerialize)]
pub struct NetworkID(u32);

impl NetworkID {
    /// Create a new `NetworkID` with an `int` value.
    pub const fn new(int: u32) -> Self {
        Self(int)
    }

    /// Get the `u32` value of this `NetworkID`.
    pub const fn int(&self) -> u32 {
        self.0
    }
}

/// 32-byte cryptographic hash.
///
/// Every hash that identifies a SHAMap node, a ledger, a transaction, or a transaction set is a
/// SHA-512Half digest (the first 32 bytes of a SHA-512 digest) computed over a four byte
/// [`HashPrefix`](super::crypto_primitives::HashPrefix) followed by a canonical serialization. See
/// [`sha512_half`](super::crypto_primitives::sha512_half).
///
/// `CryptoHash`es are totally ordered by their big-endian byte value. The ordering is used wherever
/// iteration order must be identical across nodes, for example when tallying disputed transactions.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, BorshDeserialize, BorshSerialize,
)]
pub struct CryptoHash([u8; 32]);

impl CryptoHash {
    /// Create a new `CryptoHash` wrapping `bytes`.
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// The all-zero hash. Stands for "no node" in inner node child slots and for the hash of an empty
    /// SHAMap.
    pub const fn zero() -> Self {
        Self([0u8; 32])
    }

    /// Create a `CryptoHash` from a slice, if the slice is exactly 32 bytes long.
    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        let bytes: [u8; 32] = slice.try_into().ok()?;
        Some(Self(bytes))
    }

    /// Get the inner `[u8; 32]` value of this `CryptoHash`.
    pub const fn bytes(&self) -> [u8; 32] {
        self.0
    }

    /// Get a reference to the inner bytes of this `CryptoHash`.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Check whether this is the all-zero hash.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Get the 4-bit nibble at `depth`, counting from the most significant nibble.
    ///
    /// # Panics
    ///
    /// Panics if `depth >= 64`.
    pub fn nibble(&self, depth: u8) -> u8 {
        let byte = self.0[(depth / 2) as usize];
        if depth % 2 == 0 {
            byte >> 4
        } else {
            byte & 0x0F
        }
    }
}

impl Display for CryptoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{:02X}", byte)?;
        }
        Ok(())
    }
}

impl Debug for CryptoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

/// Sequence number of a ledger. The genesis ledger has sequence 1, and every ledger's sequence is one
/// greater than its parent's.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    BorshDeserialize,
    BorshSerialize,
)]
pub struct LedgerSeq(u32);

impl LedgerSeq {
    /// Create a new `LedgerSeq` with an `int` inner value.
    pub const fn new(int: u32) -> Self {
        Self(int)
    }

    /// Sequence number of the genesis ledger.
    pub const fn genesis() -> Self {
        Self(1)
    }

    /// Get the inner `u32` value of this `LedgerSeq`.
    pub const fn int(&self) -> u32 {
        self.0
    }

    /// Get the big-endian representation of the inner value, as used in canonical serializations.
    pub fn to_be_bytes(&self) -> [u8; 4] {
        self.0.to_be_bytes()
    }

    /// Get the sequence number that directly follows this one.
    pub fn next(&self) -> LedgerSeq {
        LedgerSeq(self.0.saturating_add(1))
    }
}

impl Display for LedgerSeq {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Add<u32> for LedgerSeq {
    type Output = LedgerSeq;
    fn add(self, rhs: u32) -> Self::Output {
        LedgerSeq(self.0.saturating_add(rhs))
    }
}

impl Sub<LedgerSeq> for LedgerSeq {
    type Output = i64;
    fn sub(self, rhs: LedgerSeq) -> Self::Output {
        self.0 as i64 - rhs.0 as i64
    }
}

/// Offset in seconds between the Unix epoch and the network epoch (2000-01-01T00:00:00Z).
const NETWORK_EPOCH_OFFSET: u64 = 946_684_800;

/// A point in network time: whole seconds since 2000-01-01T00:00:00Z.
///
/// Ledger close times, proposal close times, and validation signing times are all `NetTime`s. The zero
/// value is the network epoch, and is used to mean "no time" (for example, the close time of a ledger
/// whose close time could not be agreed on is still a real time, but a proposal close time of zero is
/// never rounded).
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    BorshDeserialize,
    BorshSerialize,
)]
pub struct NetTime(u32);

impl NetTime {
    /// Create a new `NetTime` from a number of seconds since the network epoch.
    pub const fn new(secs: u32) -> Self {
        Self(secs)
    }

    /// The network epoch itself.
    pub const fn epoch() -> Self {
        Self(0)
    }

    /// Convert a `SystemTime` into a `NetTime`, saturating at the network epoch.
    pub fn from_system_time(time: SystemTime) -> Self {
        let unix_secs = time
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let secs = unix_secs.saturating_sub(NETWORK_EPOCH_OFFSET);
        Self(secs.min(u32::MAX as u64) as u32)
    }

    /// Get the number of seconds since the network epoch.
    pub const fn int(&self) -> u32 {
        self.0
    }

    /// Check whether this is the network epoch (i.e., "no time").
    pub const fn is_epoch(&self) -> bool {
        self.0 == 0
    }

    /// Get the big-endian representation of the inner value, as used in canonical serializations.
    pub fn to_be_bytes(&self) -> [u8; 4] {
        self.0.to_be_bytes()
    }

    /// Signed number of milliseconds from `earlier` to `self`. Negative if `earlier` is after `self`.
    pub fn millis_since(&self, earlier: NetTime) -> i64 {
        (self.0 as i64 - earlier.0 as i64) * 1000
    }
}

impl Display for NetTime {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Add<Duration> for NetTime {
    type Output = NetTime;
    fn add(self, rhs: Duration) -> Self::Output {
        let secs = (self.0 as u64).saturating_add(rhs.as_secs());
        NetTime(secs.min(u32::MAX as u64) as u32)
    }
}

impl Sub<Duration> for NetTime {
    type Output = NetTime;
    fn sub(self, rhs: Duration) -> Self::Output {
        NetTime((self.0 as u64).saturating_sub(rhs.as_secs()) as u32)
    }
}

/// Sequence number of a validator's proposal within one consensus round.
///
/// A validator's first proposal in a round has sequence [`INITIAL`](Self::INITIAL), and every
/// subsequent change of position increments it. The special value [`BOW_OUT`](Self::BOW_OUT) announces
/// that the validator has stopped proposing for the rest of the round.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct ProposeSeq(u32);

impl ProposeSeq {
    pub const INITIAL: ProposeSeq = ProposeSeq(0);
    pub const BOW_OUT: ProposeSeq = ProposeSeq(u32::MAX);

    /// Create a new `ProposeSeq` wrapping `int`.
    pub const fn new(int: u32) -> Self {
        Self(int)
    }

    /// Get the inner `u32` value of this `ProposeSeq`.
    pub const fn int(&self) -> u32 {
        self.0
    }
}

impl AddAssign<u32> for ProposeSeq {
    fn add_assign(&mut self, rhs: u32) {
        self.0 = self.0.saturating_add(rhs)
    }
}

/// Ed25519 digital signature.
///
/// Produced using the [`ed25519_dalek`] crate, whose main definitions are re-exported from the
/// [`crypto_primitives`](super::crypto_primitives) module.
#[derive(Clone, Copy, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct SignatureBytes([u8; 64]);

impl SignatureBytes {
    /// Create a new `SignatureBytes` wrapping `bytes`.
    pub fn new(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    /// Get the inner `[u8; 64]` value of this `SignatureBytes`.
    pub const fn bytes(&self) -> [u8; 64] {
        self.0
    }
}

impl Debug for SignatureBytes {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "SignatureBytes(")?;
        for byte in &self.0[..8] {
            write!(f, "{:02X}", byte)?;
        }
        write!(f, "..)")
    }
}

/// Bytes of an Ed25519 verifying key. Used wherever a verifying key has to be serialized, ordered, or
/// stored in a message, since [`VerifyingKey`](ed25519_dalek::VerifyingKey) implements neither the Borsh
/// traits nor `Ord`.
pub type VerifyingKeyBytes = [u8; 32];

/// Trust weight of a specific validator in consensus decisions.
///
/// The higher the power, the more weight the validator's positions and validations have.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, BorshDeserialize, BorshSerialize)]
pub struct Power(u64);

impl Power {
    /// Create a new `Power` wrapping `int`.
    pub fn new(int: u64) -> Self {
        Self(int)
    }

    /// Get the inner `u64` value of this `Power`.
    pub const fn int(&self) -> u64 {
        self.0
    }
}

/// Sum of the [`Power`]s of a group of validators.
///
/// The inner type is `u128`, which is bigger than the inner `u64` of `Power`, so that summing up large
/// `Power`s does not overflow.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct TotalPower(u128);

impl TotalPower {
    /// Create a new `TotalPower` wrapping `int`.
    pub fn new(int: u128) -> Self {
        Self(int)
    }

    /// Get the inner `u128` value of this `TotalPower`.
    pub const fn int(&self) -> u128 {
        self.0
    }
}

impl AddAssign<Power> for TotalPower {
    fn add_assign(&mut self, rhs: Power) {
        self.0.add_assign(rhs.0 as u128)
    }
}

impl Add<TotalPower> for TotalPower {
    type Output = TotalPower;
    fn add(self, rhs: TotalPower) -> Self::Output {
        TotalPower(self.0 + rhs.0)
    }
}
