use std::time::{SystemTime, UNIX_EPOCH};

const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// Date and time captured once per translation unit, in UTC
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BuildStamp {
    seconds: u64,
}

impl BuildStamp {
    /// Capture the current instant
    #[must_use]
    pub fn now() -> Self {
        let seconds = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        Self { seconds }
    }

    /// Fixed instant, in seconds since the Unix epoch
    #[must_use]
    pub fn from_unix(seconds: u64) -> Self {
        Self { seconds }
    }

    /// `"Mmm dd yyyy"`, the spelling of `__DATE__` (day padded with a space)
    #[must_use]
    pub fn date(&self) -> String {
        let (year, month, day) = civil_from_days(self.seconds / 86_400);
        format!("{} {:2} {}", MONTHS[month], day, year)
    }

    /// `"hh:mm:ss"`, the spelling of `__TIME__`
    #[must_use]
    pub fn time(&self) -> String {
        let seconds_today = self.seconds % 86_400;
        format!(
            "{:02}:{:02}:{:02}",
            seconds_today / 3600,
            (seconds_today % 3600) / 60,
            seconds_today % 60
        )
    }
}

/// Year, zero-based month and one-based day for a day count since 1970-01-01
fn civil_from_days(days_since_epoch: u64) -> (u64, usize, u64) {
    let mut year = 1970;
    let mut days = days_since_epoch;
    loop {
        let days_in_year = if is_leap_year(year) { 366 } else { 365 };
        if days < days_in_year {
            break;
        }
        days -= days_in_year;
        year += 1;
    }

    let february = if is_leap_year(year) { 29 } else { 28 };
    let month_days = [31, february, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];
    let mut day = days + 1;
    let mut month = 0;
    for (i, &len) in month_days.iter().enumerate() {
        if day <= len {
            month = i;
            break;
        }
        day -= len;
    }
    (year, month, day)
}

const fn is_leap_year(year: u64) -> bool {
    (year.is_multiple_of(4) && !year.is_multiple_of(100)) || year.is_multiple_of(400)
}
