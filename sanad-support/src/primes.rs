//! Prime sizing for open hash tables.
//!
//! Bucket counts are kept prime so that hash values with a common
//! stride still spread across the table.

/// Returns `true` if `n` is prime.
pub fn is_prime(n: usize) -> bool {
    if n < 2 {
        return false;
    }
    if n % 2 == 0 {
        return n == 2;
    }
    let mut divisor = 3;
    while divisor * divisor <= n {
        if n % divisor == 0 {
            return false;
        }
        divisor += 2;
    }
    true
}

/// Returns the smallest prime `>= n`.
///
/// ```
/// use sanad_support::primes::next_prime;
///
/// assert_eq!(next_prime(16), 17);
/// assert_eq!(next_prime(17), 17);
/// ```
pub fn next_prime(n: usize) -> usize {
    let mut candidate = n.max(2);
    while !is_prime(candidate) {
        candidate += 1;
    }
    candidate
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_primes() {
        let primes: Vec<usize> = (0..30).filter(|&n| is_prime(n)).collect();
        assert_eq!(primes, vec![2, 3, 5, 7, 11, 13, 17, 19, 23, 29]);
    }

    #[test]
    fn next_prime_rounds_up() {
        assert_eq!(next_prime(0), 2);
        assert_eq!(next_prime(18), 19);
        assert_eq!(next_prime(90), 97);
    }
}
