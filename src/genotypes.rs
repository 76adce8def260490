use std::fmt;
use std::str::FromStr;

/// A diploid genotype as an ordered pair of allele indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Genotype {
    pub alleles: (u32, u32),
    pub phased: bool,
}

impl Genotype {
    pub fn new(first: u32, second: u32, phased: bool) -> Self {
        Genotype {
            alleles: (first, second),
            phased,
        }
    }
}

impl FromStr for Genotype {
    type Err = String;

    /// Split on `/` if present, otherwise on `|`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (sep, phased) = if s.contains('/') { ('/', false) } else { ('|', true) };
        let mut parts = s.split(sep);
        let (first, second) = match (parts.next(), parts.next(), parts.next()) {
            (Some(a), Some(b), None) => (a, b),
            _ => return Err(format!("genotype '{}' is not a pair of alleles", s)),
        };
        let parse = |a: &str| {
            a.trim()
                .parse::<u32>()
                .map_err(|_| format!("genotype '{}' has non-numeric allele '{}'", s, a))
        };
        Ok(Genotype::new(parse(first)?, parse(second)?, phased))
    }
}

impl fmt::Display for Genotype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sep = if self.phased { "|" } else { "/" };
        write!(f, "{}{}{}", self.alleles.0, sep, self.alleles.1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unphased() {
        let gt: Genotype = "0/1".parse().unwrap();
        assert_eq!(gt.alleles, (0, 1));
        assert!(!gt.phased);
    }

    #[test]
    fn test_phased() {
        let gt: Genotype = "1|1".parse().unwrap();
        assert_eq!(gt.alleles, (1, 1));
        assert!(gt.phased);
        assert_eq!(gt.to_string(), "1|1");
    }

    #[test]
    fn test_display_keeps_separator() {
        assert_eq!("0/2".parse::<Genotype>().unwrap().to_string(), "0/2");
    }

    #[test]
    fn test_invalid() {
        assert!("./.".parse::<Genotype>().is_err());
        assert!("1".parse::<Genotype>().is_err());
        assert!("0/1/2".parse::<Genotype>().is_err());
        assert!("".parse::<Genotype>().is_err());
    }
}
