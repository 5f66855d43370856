//! Size and ETA grammars used by the downloader's human-readable progress lines.

/// Bytes per unit. Binary units (`KiB`..`EiB`) are powers of 1024, decimal ones (`KB`..`EB`) powers of 1000.
pub fn unit_multiplier(unit: &str) -> Option<u64> {
    let unit = unit.trim();
    if unit.eq_ignore_ascii_case("b") {
        return Some(1);
    }
    let lower = unit.to_ascii_lowercase();
    let (prefix, binary) = if let Some(p) = lower.strip_suffix("ib") {
        (p, true)
    } else if let Some(p) = lower.strip_suffix('b') {
        (p, false)
    } else {
        return None;
    };
    let exp = match prefix {
        "k" => 1,
        "m" => 2,
        "g" => 3,
        "t" => 4,
        "p" => 5,
        "e" => 6,
        _ => return None,
    };
    let base: u64 = if binary { 1024 } else { 1000 };
    Some(base.pow(exp))
}

/// `value` in `unit` as bytes. Malformed values and unknown units parse to 0.
pub fn parse_size(value: &str, unit: &str) -> u64 {
    let Ok(n) = value.trim().parse::<f64>() else {
        return 0;
    };
    if !n.is_finite() || n < 0.0 {
        return 0;
    }
    let Some(mult) = unit_multiplier(unit) else {
        return 0;
    };
    if n.fract() == 0.0 && n <= u64::MAX as f64 {
        return (n as u64).saturating_mul(mult);
    }
    (n * mult as f64) as u64
}

/// Split a combined size like `15.30MiB` or `1.2 GB` into value and unit, then parse it.
pub fn parse_size_str(s: &str) -> u64 {
    let s = s.trim().trim_start_matches('~').trim();
    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (value, unit) = s.split_at(split);
    if unit.trim().is_empty() {
        return parse_size(value, "B");
    }
    parse_size(value, unit)
}

/// Integer field from a machine-readable record. `NA`, empty or garbage parse to 0.
pub fn safe_int(s: &str) -> u64 {
    let s = s.trim();
    if s.is_empty() || s.eq_ignore_ascii_case("na") {
        return 0;
    }
    match s.parse::<f64>() {
        Ok(n) if n.is_finite() && n > 0.0 => n as u64,
        _ => 0,
    }
}

/// `H:MM:SS` or `M:SS` (a bare number is seconds). None when the total overflows.
pub fn parse_eta_hms(s: &str) -> Option<u64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let parts: Vec<u64> = s
        .split(':')
        .map(|p| p.trim().parse::<u64>())
        .collect::<Result<_, _>>()
        .ok()?;
    let (h, m, sec) = match parts.as_slice() {
        [h, m, sec] => (*h, *m, *sec),
        [m, sec] => (0, *m, *sec),
        [sec] => (0, 0, *sec),
        _ => return None,
    };
    h.checked_mul(3600)?
        .checked_add(m.checked_mul(60)?)?
        .checked_add(sec)
}

/// ETA field: seconds when there is no colon, otherwise `H:MM:SS` / `M:SS`.
/// `NA`, `Unknown` and empty are None.
pub fn parse_eta(s: &str) -> Option<u64> {
    let s = s.trim();
    if s.is_empty() || s.eq_ignore_ascii_case("na") || s.eq_ignore_ascii_case("unknown") {
        return None;
    }
    if s.contains(':') {
        return parse_eta_hms(s);
    }
    match s.parse::<f64>() {
        Ok(n) if n.is_finite() && n >= 0.0 => Some(n as u64),
        _ => None,
    }
}
