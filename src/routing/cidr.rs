//! Bucketed IPv4 CIDR Membership Table

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::Path;

use ipnet::Ipv4Net;
use tracing::debug;

use super::types::{read_rule_lines, RuleError};

/// Static IPv4 prefix-membership index.
///
/// Every record is filed under `base >> shift_bits`, where `shift_bits` is
/// derived from the coarsest prefix in the table. Any record that can contain
/// an address therefore lives in that address's bucket.
#[derive(Debug, Clone)]
pub struct CidrTable {
    shift_bits: u32,
    buckets: HashMap<u32, Vec<Ipv4Net>>,
    len: usize,
}

impl CidrTable {
    /// Build a table from rule lines. IPv6 and blank lines are skipped.
    pub fn load<I, S>(lines: I) -> Result<Self, RuleError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut records = Vec::new();
        for line in lines {
            let line = line.as_ref().trim();
            if line.is_empty() || line.contains(':') {
                continue;
            }
            let net: Ipv4Net = line.parse().map_err(|_| RuleError::MalformedCidr {
                line: line.to_string(),
            })?;
            records.push(net);
        }

        let min_prefix = records
            .iter()
            .map(Ipv4Net::prefix_len)
            .min()
            .ok_or_else(|| RuleError::Empty {
                source: "cidr".to_string(),
            })?;
        if !(1..=32).contains(&min_prefix) {
            return Err(RuleError::PrefixOutOfRange {
                prefix_len: min_prefix,
            });
        }

        let shift_bits = 32 - u32::from(min_prefix);
        let len = records.len();
        let mut buckets: HashMap<u32, Vec<Ipv4Net>> = HashMap::new();
        for net in records {
            let bucket = u32::from(net.addr()) >> shift_bits;
            buckets.entry(bucket).or_default().push(net);
        }

        debug!(
            "Loaded {} CIDR records into {} buckets (shift {})",
            len,
            buckets.len(),
            shift_bits
        );

        Ok(Self {
            shift_bits,
            buckets,
            len,
        })
    }

    /// Build a table from a rule file
    pub fn from_file(path: &Path) -> Result<Self, RuleError> {
        let lines = read_rule_lines(path)?;
        Self::load(lines).map_err(|e| match e {
            RuleError::Empty { .. } => RuleError::Empty {
                source: path.display().to_string(),
            },
            other => other,
        })
    }

    /// Whether `ip` falls inside any loaded record
    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        let bucket = u32::from(ip) >> self.shift_bits;
        self.buckets
            .get(&bucket)
            .map_or(false, |records| records.iter().any(|net| net.contains(&ip)))
    }

    /// Number of loaded records
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bits dropped from an address to find its bucket
    pub fn shift_bits(&self) -> u32 {
        self.shift_bits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn naive_contains(rules: &[&str], ip: Ipv4Addr) -> bool {
        rules
            .iter()
            .filter(|r| !r.contains(':'))
            .map(|r| r.parse::<Ipv4Net>().unwrap())
            .any(|net| net.contains(&ip))
    }

    #[test]
    fn test_basic_membership() {
        let table = CidrTable::load(["10.0.0.0/8", "192.168.1.0/24"]).unwrap();
        assert_eq!(table.shift_bits(), 24);
        assert!(table.contains(Ipv4Addr::new(10, 1, 2, 3)));
        assert!(table.contains(Ipv4Addr::new(192, 168, 1, 200)));
        assert!(!table.contains(Ipv4Addr::new(192, 168, 2, 1)));
        assert!(!table.contains(Ipv4Addr::new(8, 8, 8, 8)));
    }

    #[test]
    fn test_bucketing_matches_linear_scan() {
        let rules = [
            "1.0.1.0/24",
            "1.0.8.0/21",
            "1.0.32.0/19",
            "14.0.0.0/12",
            "36.96.0.0/11",
            "58.14.0.0/15",
            "223.255.252.0/23",
            "2001:db8::/32",
        ];
        let table = CidrTable::load(rules).unwrap();
        assert_eq!(table.len(), 7);

        let samples = [
            Ipv4Addr::new(1, 0, 1, 1),
            Ipv4Addr::new(1, 0, 2, 1),
            Ipv4Addr::new(1, 0, 15, 255),
            Ipv4Addr::new(1, 0, 16, 0),
            Ipv4Addr::new(1, 0, 63, 1),
            Ipv4Addr::new(14, 15, 255, 255),
            Ipv4Addr::new(14, 16, 0, 0),
            Ipv4Addr::new(36, 127, 0, 1),
            Ipv4Addr::new(58, 15, 1, 1),
            Ipv4Addr::new(58, 16, 1, 1),
            Ipv4Addr::new(223, 255, 253, 9),
            Ipv4Addr::new(223, 255, 254, 9),
            Ipv4Addr::new(0, 0, 0, 0),
            Ipv4Addr::new(255, 255, 255, 255),
        ];
        for ip in samples {
            assert_eq!(table.contains(ip), naive_contains(&rules, ip), "mismatch for {}", ip);
        }

        // Sweep a block straddling several rules
        for third in 0..=70u8 {
            let ip = Ipv4Addr::new(1, 0, third, 7);
            assert_eq!(table.contains(ip), naive_contains(&rules, ip), "mismatch for {}", ip);
        }
    }

    #[test]
    fn test_host_routes() {
        let table = CidrTable::load(["8.8.8.8/32", "1.1.1.1/32"]).unwrap();
        assert_eq!(table.shift_bits(), 0);
        assert!(table.contains(Ipv4Addr::new(8, 8, 8, 8)));
        assert!(!table.contains(Ipv4Addr::new(8, 8, 8, 9)));
    }

    #[test]
    fn test_load_failures() {
        assert!(matches!(
            CidrTable::load(Vec::<String>::new()),
            Err(RuleError::Empty { .. })
        ));
        assert!(matches!(
            CidrTable::load(["::1/128", ""]),
            Err(RuleError::Empty { .. })
        ));
        assert!(matches!(
            CidrTable::load(["10.0.0.0/8", "not-a-cidr"]),
            Err(RuleError::MalformedCidr { .. })
        ));
        assert!(matches!(
            CidrTable::load(["0.0.0.0/0"]),
            Err(RuleError::PrefixOutOfRange { prefix_len: 0 })
        ));
    }
}
