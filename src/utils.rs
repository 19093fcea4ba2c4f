const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Derives a stable per-series seed from a run seed, an instrument and a bar length.
///
/// FNV-1a, so the value does not change across builds or platforms the way `DefaultHasher` may.
pub(crate) fn seed_for(seed: u64, instrument: &str, minutes: i64) -> u64 {
    seed.to_le_bytes()
        .iter()
        .chain(instrument.as_bytes())
        .chain(minutes.to_le_bytes().iter())
        .fold(FNV_OFFSET, |hash, byte| (hash ^ *byte as u64).wrapping_mul(FNV_PRIME))
}

/// Rounds to 2 decimals, half away from zero.
#[cfg(feature = "serde")]
pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(feature = "serde")]
/// Reads and deserializes the JSON document at `filepath`.
pub(crate) fn read_json<T>(filepath: &std::path::Path) -> crate::errors::Result<T>
where
    T: serde::de::DeserializeOwned,
{
    use crate::errors::Error;
    use std::{fs::File, io::BufReader};

    let file = File::open(filepath)?;
    let reader = BufReader::new(file);
    serde_json::from_reader(reader).map_err(Error::from)
}
