use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use cron::Schedule;
use tracing::debug;

use scheduler_errors::{SchedulerError, SchedulerResult};

/// 查找下一次触发时间的最大范围（约4年），保证不可满足的表达式也能终止
pub const SEARCH_HORIZON_DAYS: i64 = 4 * 366;

const WEEKDAY_NAMES: [&str; 8] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT", "SUN"];

/// CRON表达式解析和调度工具
///
/// 支持传统的5字段格式（分 时 日 月 周）以及带秒的6字段格式（秒 分 时 日 月 周），
/// 字段内可使用 `*`、范围、步长（`*/n`）和列表。星期字段按传统cron语义解释：
/// 0 和 7 都表示周日。
#[derive(Debug, Clone)]
pub struct CronScheduler {
    expression: String,
    schedule: Schedule,
}

impl CronScheduler {
    /// 创建新的CRON调度器
    pub fn new(cron_expr: &str) -> SchedulerResult<Self> {
        let normalized = normalize_expression(cron_expr)?;
        let schedule = Schedule::from_str(&normalized)
            .map_err(|e| SchedulerError::invalid_cron(cron_expr, e.to_string()))?;

        Ok(Self {
            expression: cron_expr.trim().to_string(),
            schedule,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// 获取 `after` 之后（不含）的下一次执行时间
    ///
    /// 搜索范围之内没有触发时间时返回 `InvalidCron`。
    pub fn next_fire_time(&self, after: DateTime<Utc>) -> SchedulerResult<DateTime<Utc>> {
        let horizon = after + Duration::days(SEARCH_HORIZON_DAYS);
        match self.schedule.after(&after).next() {
            Some(next) if next <= horizon => Ok(next),
            _ => {
                debug!("CRON表达式 {} 在 {} 之后的搜索范围内没有触发时间", self.expression, after);
                Err(SchedulerError::invalid_cron(
                    &self.expression,
                    format!("no occurrence within {SEARCH_HORIZON_DAYS} days after {after}"),
                ))
            }
        }
    }

    /// 获取从指定时间开始的多个执行时间
    pub fn upcoming_times(&self, from: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        let horizon = from + Duration::days(SEARCH_HORIZON_DAYS);
        self.schedule
            .after(&from)
            .take_while(|next| *next <= horizon)
            .take(count)
            .collect()
    }

    /// 验证CRON表达式可以解析，且在搜索范围内至少触发一次
    pub fn validate_cron_expression(cron_expr: &str) -> SchedulerResult<()> {
        Self::new(cron_expr)?.next_fire_time(Utc::now())?;
        Ok(())
    }
}

/// 计算表达式在 `after` 之后的下一次触发时间
pub fn next_fire_time(cron_expr: &str, after: DateTime<Utc>) -> SchedulerResult<DateTime<Utc>> {
    CronScheduler::new(cron_expr)?.next_fire_time(after)
}

/// 转换为 cron crate 接受的 秒 分 时 日 月 周 格式
fn normalize_expression(cron_expr: &str) -> SchedulerResult<String> {
    let fields: Vec<&str> = cron_expr.split_whitespace().collect();
    let mut fields: Vec<String> = match fields.len() {
        5 => std::iter::once("0")
            .chain(fields)
            .map(str::to_string)
            .collect(),
        6 => fields.into_iter().map(str::to_string).collect(),
        n => {
            return Err(SchedulerError::invalid_cron(
                cron_expr,
                format!("expected 5 or 6 fields, found {n}"),
            ))
        }
    };

    fields[5] = normalize_day_of_week(&fields[5])
        .map_err(|message| SchedulerError::invalid_cron(cron_expr, message))?;

    Ok(fields.join(" "))
}

/// 数字星期（0-7，周日为0或7）转换为英文缩写，其余写法原样保留
fn normalize_day_of_week(field: &str) -> Result<String, String> {
    let mut items = Vec::new();
    for item in field.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => (range, Some(step)),
            None => (item, None),
        };

        let converted = match range.split_once('-') {
            Some((start, end)) => {
                let start_day = weekday_number(start)?;
                let end_day = weekday_number(end)?;
                match (start_day, end_day) {
                    (Some(0), Some(7)) => "SUN-SAT".to_string(),
                    // 以7结尾的范围，如 5-7，拆为 FRI-SAT 和 SUN
                    (Some(s), Some(7)) if step.is_none() && s > 0 && s < 7 => {
                        if s == 6 {
                            "SAT,SUN".to_string()
                        } else {
                            format!("{}-SAT,SUN", WEEKDAY_NAMES[s])
                        }
                    }
                    _ => format!(
                        "{}-{}",
                        start_day.map_or_else(|| start.to_string(), |d| WEEKDAY_NAMES[d].to_string()),
                        end_day.map_or_else(|| end.to_string(), |d| WEEKDAY_NAMES[d].to_string())
                    ),
                }
            }
            None => match weekday_number(range)? {
                Some(day) => WEEKDAY_NAMES[day].to_string(),
                None => range.to_string(),
            },
        };

        match step {
            Some(step) => items.push(format!("{converted}/{step}")),
            None => items.push(converted),
        }
    }
    Ok(items.join(","))
}

fn weekday_number(token: &str) -> Result<Option<usize>, String> {
    if token.is_empty() || !token.chars().all(|c| c.is_ascii_digit()) {
        return Ok(None);
    }
    match token.parse::<usize>() {
        Ok(day) if day <= 7 => Ok(Some(day)),
        _ => Err(format!("day-of-week value out of range: {token}")),
    }
}
