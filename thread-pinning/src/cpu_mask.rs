//! Ordered set of CPU IDs a process or thread may run on.

use {
    crate::error::CpuAffinityError,
    std::{collections::BTreeSet, fmt, str::FromStr},
};

/// Set of permitted CPU IDs, kept sorted in ascending order without duplicates.
///
/// Pinning addresses CPUs by their ordinal within this set rather than by raw
/// ID, so sparse masks such as `{2, 5, 7}` behave like a dense `{0, 1, 2}`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct CpuMask {
    cpus: Vec<usize>,
}

impl CpuMask {
    /// Builds a mask from any collection of CPU IDs. Order and duplicates do not matter.
    pub fn from_cpus(cpus: impl IntoIterator<Item = usize>) -> Self {
        let mut cpus: Vec<usize> = cpus.into_iter().collect();
        cpus.sort_unstable();
        cpus.dedup();
        Self { cpus }
    }

    /// Number of CPUs in the mask.
    pub fn len(&self) -> usize {
        self.cpus.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cpus.is_empty()
    }

    pub fn contains(&self, cpu: usize) -> bool {
        self.cpus.binary_search(&cpu).is_ok()
    }

    /// Returns the `position`-th set CPU (0-based), scanning in ascending order.
    ///
    /// # Examples
    ///
    /// ```
    /// # use agave_thread_pinning::CpuMask;
    /// let mask = CpuMask::from_cpus([2, 5, 7]);
    /// assert_eq!(mask.nth_cpu(1), Some(5));
    /// assert_eq!(mask.nth_cpu(3), None);
    /// ```
    pub fn nth_cpu(&self, position: usize) -> Option<usize> {
        self.cpus.get(position).copied()
    }

    /// Highest CPU ID in the mask.
    pub fn max_cpu(&self) -> Option<usize> {
        self.cpus.last().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.cpus.iter().copied()
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.cpus
    }
}

impl FromIterator<usize> for CpuMask {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        Self::from_cpus(iter)
    }
}

/// Parses a CPU range list string (e.g., "0-3,5,7-9"), the format used by
/// `/sys/devices/system/cpu/*` and `taskset -c`.
impl FromStr for CpuMask {
    type Err = CpuAffinityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut cpus = BTreeSet::new();

        for part in s.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }

            if let Some((start_str, end_str)) = part.split_once('-') {
                let parse = |bound: &str| {
                    bound.trim().parse::<usize>().map_err(|_| {
                        CpuAffinityError::ParseError(format!("Invalid CPU range: {part}"))
                    })
                };
                let (start, end) = (parse(start_str)?, parse(end_str)?);
                if start > end {
                    return Err(CpuAffinityError::ParseError(format!(
                        "Invalid CPU range: {part}"
                    )));
                }
                cpus.extend(start..=end);
            } else {
                let cpu = part
                    .parse::<usize>()
                    .map_err(|_| CpuAffinityError::ParseError(format!("Invalid CPU ID: {part}")))?;
                cpus.insert(cpu);
            }
        }

        Ok(Self {
            cpus: cpus.into_iter().collect(),
        })
    }
}

/// Formats the mask back into a compact range list.
impl fmt::Display for CpuMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut cpus = self.cpus.iter().copied().peekable();
        let mut first = true;
        while let Some(start) = cpus.next() {
            let mut end = start;
            while cpus.next_if_eq(&end.saturating_add(1)).is_some() {
                end = end.saturating_add(1);
            }
            if !first {
                f.write_str(",")?;
            }
            first = false;
            if start == end {
                write!(f, "{start}")?;
            } else {
                write!(f, "{start}-{end}")?;
            }
        }
        Ok(())
    }
}
