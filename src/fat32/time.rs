use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

const MIN_YEAR: i32 = 1980;
const MAX_YEAR: i32 = 2107;

/// Clamps into the representable 1980..=2107 range.
pub fn encode_date(date: NaiveDate) -> u16 {
    let (year, month, day) = match date.year() {
        y if y < MIN_YEAR => (MIN_YEAR, 1, 1),
        y if y > MAX_YEAR => (MAX_YEAR, 12, 31),
        y => (y, date.month(), date.day()),
    };
    (((year - MIN_YEAR) as u16) << 9) | ((month as u16) << 5) | day as u16
}

pub fn encode_time(time: NaiveTime) -> u16 {
    ((time.hour() as u16) << 11) | ((time.minute() as u16) << 5) | (time.second() as u16 / 2)
}

/// Hundredths of a second past the two-second granularity of the time field.
pub fn encode_tenths(time: NaiveTime) -> u8 {
    let hundredths = (time.nanosecond() / 10_000_000).min(99);
    ((time.second() % 2) * 100 + hundredths) as u8
}

pub fn encode(at: NaiveDateTime) -> (u16, u16) {
    if at.year() < MIN_YEAR {
        return (encode_date(at.date()), 0);
    }
    if at.year() > MAX_YEAR {
        return (encode_date(at.date()), (23 << 11) | (59 << 5) | 29);
    }
    (encode_date(at.date()), encode_time(at.time()))
}

pub fn decode_date(raw: u16) -> Option<NaiveDate> {
    let year = MIN_YEAR + (raw >> 9) as i32;
    let month = ((raw >> 5) & 0x0F) as u32;
    let day = (raw & 0x1F) as u32;
    NaiveDate::from_ymd_opt(year, month, day)
}

pub fn decode_time(raw: u16, tenths: u8) -> Option<NaiveTime> {
    let hour = (raw >> 11) as u32;
    let minute = ((raw >> 5) & 0x3F) as u32;
    let extra = tenths.min(199) as u32;
    let second = (raw & 0x1F) as u32 * 2 + extra / 100;
    NaiveTime::from_hms_milli_opt(hour, minute, second, (extra % 100) * 10)
}

/// `None` for zeroed or out-of-range fields.
pub fn decode(date: u16, time: u16, tenths: u8) -> Option<NaiveDateTime> {
    Some(decode_date(date)?.and_time(decode_time(time, tenths)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_fields() {
        let at = NaiveDate::from_ymd_opt(2024, 3, 17)
            .unwrap()
            .and_hms_opt(13, 45, 31)
            .unwrap();
        let (date, time) = encode(at);
        assert_eq!(date, (44 << 9) | (3 << 5) | 17);
        assert_eq!(time, (13 << 11) | (45 << 5) | 15);
        assert_eq!(encode_tenths(at.time()), 100);
        assert_eq!(decode(date, time, 100), Some(at));
    }

    #[test]
    fn clamps_before_epoch() {
        let at = NaiveDate::from_ymd_opt(1970, 6, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        let (date, time) = encode(at);
        assert_eq!(decode_date(date), NaiveDate::from_ymd_opt(1980, 1, 1));
        assert_eq!(time, 0);
    }

    #[test]
    fn zero_date_is_absent() {
        assert_eq!(decode(0, 0, 0), None);
    }
}
