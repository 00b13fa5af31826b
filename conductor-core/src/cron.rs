//! cron 表达式解析与下一次触发时间计算
//!
//! 支持标准 5 字段格式: 分 时 日 月 周，每个字段可以是 `*`、`*/n`、
//! 单值、列表 `a,b`、范围 `a-b` 以及带步长的范围 `a-b/n`。
//! 表达式在给定的 IANA 时区中解释，返回的时间统一为 UTC。

use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime,
    TimeZone, Timelike, Utc};
use chrono_tz::Tz;

use crate::constants::cron::{CRON_FIELDS_COUNT, MAX_SEARCH_YEARS};
use crate::{ConductorError, Result};

/// 下一次触发时间计算器
pub trait CronEval: Send + Sync {
    /// 返回严格晚于 `from` 的第一个触发时间
    fn next_after(&self, expression: &str, timezone: &str, from: DateTime<Utc>)
    -> Result<DateTime<Utc>>;
}

/// 默认的纯函数实现
#[derive(Debug, Clone, Copy, Default)]
pub struct CronPlanner;

impl CronEval for CronPlanner {
    fn next_after(
        &self,
        expression: &str,
        timezone: &str,
        from: DateTime<Utc>,
    ) -> Result<DateTime<Utc>> {
        let schedule = CronSchedule::parse(expression)?;
        let tz = parse_timezone(timezone).map_err(|reason| {
            ConductorError::invalid_cron(expression, reason)
        })?;
        schedule.next_after(expression, tz, from)
    }
}

/// 解析 IANA 时区名
pub fn parse_timezone(name: &str) -> std::result::Result<Tz, String> {
    name.parse::<Tz>()
        .map_err(|_| format!("未知时区: {name}"))
}

/// 解析后的 cron 表达式，每个字段用位图表示
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    minutes: u64,
    hours: u64,
    days_of_month: u64,
    months: u64,
    days_of_week: u64,
    dom_restricted: bool,
    dow_restricted: bool,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self> {
        let parts: Vec<&str> = expression.split_whitespace().collect();

        // 标准cron表达式应该有5个字段: 分 时 日 月 周
        if parts.len() != CRON_FIELDS_COUNT {
            return Err(ConductorError::invalid_cron(
                expression,
                format!("需要 {CRON_FIELDS_COUNT} 个字段，实际为 {}", parts.len()),
            ));
        }

        let field = |index: usize, min: u32, max: u32, name: &str| {
            parse_field(parts[index], min, max).map_err(|reason| {
                ConductorError::invalid_cron(expression, format!("{name}字段: {reason}"))
            })
        };

        let minutes = field(0, 0, 59, "分钟")?;
        let hours = field(1, 0, 23, "小时")?;
        let days_of_month = field(2, 1, 31, "日期")?;
        let months = field(3, 1, 12, "月份")?;
        let mut days_of_week = field(4, 0, 7, "星期")?;

        // 7 与 0 都表示星期日
        if days_of_week & (1 << 7) != 0 {
            days_of_week = (days_of_week & !(1 << 7)) | 1;
        }

        Ok(Self {
            minutes,
            hours,
            days_of_month,
            months,
            days_of_week,
            dom_restricted: !parts[2].starts_with('*'),
            dow_restricted: !parts[4].starts_with('*'),
        })
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom = bit_set(self.days_of_month, date.day());
        let dow = bit_set(self.days_of_week, date.weekday().num_days_from_sunday());

        // 日期和星期同时受限时任一匹配即可
        if self.dom_restricted && self.dow_restricted {
            dom || dow
        } else {
            dom && dow
        }
    }

    fn next_after(&self, expression: &str, tz: Tz, from: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let local = from.with_timezone(&tz).naive_local();
        let truncated = local
            - Duration::seconds(i64::from(local.second()))
            - Duration::nanoseconds(i64::from(local.nanosecond()));
        let mut candidate = truncated + Duration::minutes(1);
        let last_year = local.year() + MAX_SEARCH_YEARS;

        while candidate.year() <= last_year {
            if !bit_set(self.months, candidate.month()) {
                candidate = first_day_of_next_month(candidate).ok_or_else(|| {
                    ConductorError::invalid_cron(expression, "日期超出范围")
                })?;
                continue;
            }

            if !self.day_matches(candidate.date()) {
                candidate = NaiveDateTime::new(
                    candidate.date() + Duration::days(1),
                    NaiveTime::default(),
                );
                continue;
            }

            if !bit_set(self.hours, candidate.hour()) {
                candidate = candidate - Duration::minutes(i64::from(candidate.minute()))
                    + Duration::hours(1);
                continue;
            }

            if !bit_set(self.minutes, candidate.minute()) {
                candidate += Duration::minutes(1);
                continue;
            }

            match tz.from_local_datetime(&candidate) {
                LocalResult::Single(dt) => {
                    let utc = dt.with_timezone(&Utc);
                    if utc > from {
                        return Ok(utc);
                    }
                }
                LocalResult::Ambiguous(earliest, latest) => {
                    for dt in [earliest, latest] {
                        let utc = dt.with_timezone(&Utc);
                        if utc > from {
                            return Ok(utc);
                        }
                    }
                }
                // 夏令时跳过的本地时间
                LocalResult::None => {}
            }

            candidate += Duration::minutes(1);
        }

        Err(ConductorError::invalid_cron(
            expression,
            format!("{MAX_SEARCH_YEARS} 年内不会触发"),
        ))
    }
}

fn bit_set(bits: u64, value: u32) -> bool {
    value < 64 && bits & (1u64 << value) != 0
}

fn first_day_of_next_month(at: NaiveDateTime) -> Option<NaiveDateTime> {
    let (year, month) = if at.month() == 12 {
        (at.year() + 1, 1)
    } else {
        (at.year(), at.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1).map(|date| NaiveDateTime::new(date, NaiveTime::default()))
}

fn parse_field(text: &str, min: u32, max: u32) -> std::result::Result<u64, String> {
    let mut bits = 0u64;

    for item in text.split(',') {
        if item.is_empty() {
            return Err(format!("'{text}' 含有空项"));
        }

        let (range, step) = match item.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| format!("无效的步长 '{step}'"))?;
                if step == 0 {
                    return Err("步长不能为 0".to_string());
                }
                (range, step)
            }
            None => (item, 1),
        };

        let (start, end) = if range == "*" {
            (min, max)
        } else if let Some((start, end)) = range.split_once('-') {
            (parse_value(start, min, max)?, parse_value(end, min, max)?)
        } else {
            let start = parse_value(range, min, max)?;
            // `a/n` 表示从 a 开始直到最大值
            if item.contains('/') {
                (start, max)
            } else {
                (start, start)
            }
        };

        if start > end {
            return Err(format!("范围 '{range}' 起点大于终点"));
        }

        let mut value = start;
        while value <= end {
            bits |= 1u64 << value;
            value += step;
        }
    }

    Ok(bits)
}

fn parse_value(text: &str, min: u32, max: u32) -> std::result::Result<u32, String> {
    let value: u32 = text.parse().map_err(|_| format!("无效的数值 '{text}'"))?;
    if value < min || value > max {
        return Err(format!("数值 {value} 超出范围 {min}-{max}"));
    }
    Ok(value)
}
