//! Human-readable renderings of sats, fee rates, and block estimates.

const SATS_PER_BTC: f64 = 100_000_000.0;
const MINUTES_PER_BLOCK: u64 = 10;

/// Insert thousands separators: 1234567 → "1,234,567".
pub fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

pub fn format_sats(sats: u64) -> String {
    format!("{} sats", group_thousands(sats))
}

pub fn format_btc(sats: u64) -> String {
    format!("{:.8} BTC", sats as f64 / SATS_PER_BTC)
}

pub fn format_fee_rate(sat_per_vb: f64) -> String {
    format!("{sat_per_vb:.1} sat/vB")
}

/// Fiat value of `sats` at `btc_price`. Zero when the price is unknown.
pub fn sats_to_fiat(sats: u64, btc_price: f64) -> f64 {
    if btc_price <= 0.0 {
        return 0.0;
    }
    sats as f64 / SATS_PER_BTC * btc_price
}

fn plural(n: u64, unit: &str) -> String {
    if n == 1 {
        format!("~{n} {unit}")
    } else {
        format!("~{n} {unit}s")
    }
}

/// Rough wall-clock duration for a number of blocks at ten minutes each.
pub fn format_block_estimate(blocks: u32) -> String {
    let minutes = blocks as u64 * MINUTES_PER_BLOCK;
    if minutes < 60 {
        return format!("~{minutes} min");
    }
    if minutes < 1_440 {
        return plural((minutes as f64 / 60.0).round() as u64, "hour");
    }
    plural((minutes as f64 / 1_440.0).round() as u64, "day")
}

/// Shorten a txid to `chars` characters on each side.
pub fn truncate_txid(txid: &str, chars: usize) -> String {
    if txid.len() <= chars * 2 || !txid.is_ascii() {
        return txid.to_string();
    }
    format!("{}…{}", &txid[..chars], &txid[txid.len() - chars..])
}

/// A txid is 64 hexadecimal characters.
pub fn is_valid_txid(value: &str) -> bool {
    value.len() == 64 && value.chars().all(|c| c.is_ascii_hexdigit())
}
