use vmimage_core::{Result, VmImageError};

/// Parses a disk size such as `20G`, `512MB` or `1073741824` into bytes.
/// Units are binary.
pub fn parse_size(size: &str) -> Result<u64> {
    let size = size.trim().to_uppercase();
    let digits_end = size
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(size.len());
    let (value, unit) = size.split_at(digits_end);

    let value = value
        .parse::<u64>()
        .map_err(|_| VmImageError::ConfigError(format!("Invalid size: {size}")))?;

    let multiplier: u64 = match unit.trim_end_matches('B') {
        "" => 1,
        "K" => 1 << 10,
        "M" => 1 << 20,
        "G" => 1 << 30,
        "T" => 1 << 40,
        _ => {
            return Err(VmImageError::ConfigError(format!(
                "Size must end with K, M, G or T: {size}"
            )));
        }
    };

    value
        .checked_mul(multiplier)
        .ok_or_else(|| VmImageError::ConfigError(format!("Size too large: {size}")))
}

/// Cache file name for a source: its last path segment, without any query.
pub fn default_filename(source: &str) -> Result<String> {
    let without_query = source.split(['?', '#']).next().unwrap_or_default();
    without_query
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty() && !name.contains(':'))
        .map(str::to_string)
        .ok_or_else(|| {
            VmImageError::ConfigError(format!(
                "Cannot derive a file name from {source}, pass --filename"
            ))
        })
}
