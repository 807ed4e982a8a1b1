use crate::{crypto::Hash, integer::Integer};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Native asset of the kernel, the only asset accepted for storage fees and
// node pledges
pub const VELA_ASSET_ID: Hash = Hash::new([
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01,
]);

// Transaction wire format
pub const TX_VERSION_HASH_SIGNATURE: u8 = 5;
pub const SNAPSHOT_VERSION_COMMON_ENCODING: u8 = 2;

pub const TRANSACTION_MAXIMUM_SIZE: usize = 1024 * 1024 * 4;
pub const SLICE_COUNT_LIMIT: usize = 256;
pub const REFERENCES_COUNT_LIMIT: usize = 2;

// Extra payload limits. Beyond the general limit, storage capacity is bought
// in steps of EXTRA_SIZE_STORAGE_STEP bytes per EXTRA_STORAGE_PRICE_STEP of
// the native asset.
pub const EXTRA_SIZE_GENERAL_LIMIT: usize = 256;
pub const EXTRA_SIZE_STORAGE_STEP: usize = 1024;
pub const EXTRA_SIZE_STORAGE_CAPACITY: usize = 1024 * 1024 * 4;
pub const EXTRA_STORAGE_PRICE_STEP: Integer = Integer::from_units(100_000); // 0.001

// Node membership
pub const KERNEL_MINIMUM_NODES_COUNT: usize = 7;
// Upper bound dictated by the cosi signer bitmap width
pub const MAX_KERNEL_NODES_COUNT: usize = 50;
pub const KERNEL_NODE_PLEDGE_AMOUNT: Integer = Integer::from_units(10_000 * 100_000_000); // 10000

pub const NANOS_PER_SECOND: u64 = 1_000_000_000;
pub const NANOS_PER_HOUR: u64 = 3600 * NANOS_PER_SECOND;
pub const NANOS_PER_DAY: u64 = 24 * NANOS_PER_HOUR;

pub const KERNEL_NODE_PLEDGE_PERIOD_MINIMUM: u64 = 12 * NANOS_PER_HOUR;
pub const KERNEL_NODE_ACCEPT_PERIOD_MINIMUM: u64 = 12 * NANOS_PER_HOUR;
pub const KERNEL_NODE_ACCEPT_PERIOD_MAXIMUM: u64 = 7 * NANOS_PER_DAY;

// Daily operation windows, in whole hours since the epoch day start
pub const KERNEL_NODE_ACCEPT_TIME_BEGIN: u64 = 13;
pub const KERNEL_NODE_ACCEPT_TIME_END: u64 = 19;
pub const KERNEL_MINT_TIME_BEGIN: u64 = 0;
pub const KERNEL_MINT_TIME_END: u64 = 2;

// Election loop tick, in seconds
pub const KERNEL_OPERATION_PERIOD: u64 = 700;

// Snapshot round pacing
pub const SNAPSHOT_ROUND_GAP: u64 = 3 * NANOS_PER_SECOND;
pub const SNAPSHOT_REFERENCE_THRESHOLD: u64 = 10;

// Mint schedule group accepted by the validator
pub const MINT_GROUP_KERNEL_NODE: &str = "KERNELNODE";
