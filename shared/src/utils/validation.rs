// Validate nomor rekening bank (8-20 digit)
pub fn is_valid_account_number(account: &str) -> bool {
    (8..=20).contains(&account.len()) && account.chars().all(|c| c.is_ascii_digit())
}

// Validate nominal transaksi (harus positif, max 10 miliar minor unit)
pub fn is_valid_amount(amount_minor: i64) -> bool {
    amount_minor > 0 && amount_minor <= 10_000_000_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_number_validation() {
        assert!(is_valid_account_number("1234567890"));
        assert!(!is_valid_account_number("1234567"));
        assert!(!is_valid_account_number("12345678901234567890123"));
        assert!(!is_valid_account_number("12345678a"));
    }

    #[test]
    fn test_amount_validation() {
        assert!(is_valid_amount(10_000));
        assert!(!is_valid_amount(0));
        assert!(!is_valid_amount(-100));
        assert!(!is_valid_amount(15_000_000_000));
    }
}
