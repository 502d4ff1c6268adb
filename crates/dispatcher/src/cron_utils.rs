use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use std::str::FromStr;
use tracing::debug;

use scheduler_core::{Result, SchedulerError};

const WEEKDAY_NAMES: [&str; 8] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT", "SUN"];

/// CRON表达式解析和调度工具
///
/// 同时接受标准的5段表达式（分 时 日 月 周）和带秒的6/7段表达式。
/// 5段表达式的星期字段按 0-7（0 和 7 都是周日）解释；日和星期都受限时按标准 cron 取并集，
/// 任一字段以 `*` 开头时取交集。6/7段表达式沿用 `cron` crate 的交集语义。
pub struct CronScheduler {
    schedules: Vec<Schedule>,
    timezone: Tz,
}

impl CronScheduler {
    /// 创建新的CRON调度器，按UTC计算
    pub fn new(cron_expr: &str) -> Result<Self> {
        Self::with_timezone(cron_expr, None)
    }

    /// 创建在指定 IANA 时区内计算触发时间的调度器
    pub fn with_timezone(cron_expr: &str, timezone: Option<&str>) -> Result<Self> {
        let schedules = Self::parse(cron_expr)?;
        let timezone = match timezone {
            Some(name) if !name.trim().is_empty() => Self::parse_timezone(name)?,
            _ => Tz::UTC,
        };

        Ok(Self {
            schedules,
            timezone,
        })
    }

    /// 获取严格晚于 `from` 的下一次执行时间
    pub fn next_execution_time(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let from = from.with_timezone(&self.timezone);
        self.schedules
            .iter()
            .filter_map(|schedule| schedule.after(&from).next())
            .min()
            .map(|next| next.with_timezone(&Utc))
    }

    /// 获取从指定时间开始的多个执行时间
    pub fn upcoming_times(&self, from: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        let from = from.with_timezone(&self.timezone);
        let mut times: Vec<DateTime<Utc>> = self
            .schedules
            .iter()
            .flat_map(|schedule| schedule.after(&from).take(count))
            .map(|next| next.with_timezone(&Utc))
            .collect();
        times.sort();
        times.dedup();
        times.truncate(count);
        times
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// 验证CRON表达式是否有效
    pub fn validate_cron_expression(cron_expr: &str) -> Result<()> {
        Self::parse(cron_expr)?;
        Ok(())
    }

    pub fn parse_timezone(name: &str) -> Result<Tz> {
        name.trim()
            .parse::<Tz>()
            .map_err(|_| SchedulerError::InvalidTimezone(name.to_string()))
    }

    /// 把5段表达式转换成带秒的6段表达式，其余形式原样返回
    pub fn normalize_expression(cron_expr: &str) -> String {
        let fields: Vec<&str> = cron_expr.split_whitespace().collect();
        if fields.len() != 5 {
            return fields.join(" ");
        }

        let weekday = normalize_weekday_field(fields[4]);
        format!(
            "0 {} {} {} {} {}",
            fields[0], fields[1], fields[2], fields[3], weekday
        )
    }

    /// 展开成需要同时生效的表达式。5段表达式的日和星期都受限时拆成两条，分别只限制其中一个字段
    pub fn expand_expression(cron_expr: &str) -> Vec<String> {
        let fields: Vec<&str> = cron_expr.split_whitespace().collect();
        if fields.len() == 5 && is_restricted(fields[2]) && is_restricted(fields[4]) {
            let by_day = [fields[0], fields[1], fields[2], fields[3], "*"].join(" ");
            let by_weekday = [fields[0], fields[1], "*", fields[3], fields[4]].join(" ");
            return vec![
                Self::normalize_expression(&by_day),
                Self::normalize_expression(&by_weekday),
            ];
        }
        vec![Self::normalize_expression(cron_expr)]
    }

    fn parse(cron_expr: &str) -> Result<Vec<Schedule>> {
        if cron_expr.trim().is_empty() {
            return Err(SchedulerError::InvalidCron {
                expr: cron_expr.to_string(),
                message: "表达式为空".to_string(),
            });
        }

        Self::expand_expression(cron_expr)
            .into_iter()
            .map(|normalized| {
                if normalized != cron_expr {
                    debug!("CRON表达式 '{}' 规范化为 '{}'", cron_expr, normalized);
                }
                Schedule::from_str(&normalized).map_err(|e| SchedulerError::InvalidCron {
                    expr: cron_expr.to_string(),
                    message: e.to_string(),
                })
            })
            .collect()
    }
}

/// 标准 cron 中以 `*` 开头的日/星期字段视为不受限
fn is_restricted(field: &str) -> bool {
    !field.starts_with('*') && field != "?"
}

fn weekday_name(token: &str) -> Option<&'static str> {
    token
        .parse::<usize>()
        .ok()
        .and_then(|n| WEEKDAY_NAMES.get(n).copied())
}

/// 数字星期转换为英文缩写，避免 0 基和 1 基编号的差异
fn normalize_weekday_field(field: &str) -> String {
    field
        .split(',')
        .map(|item| {
            let (base, step) = match item.split_once('/') {
                Some((base, step)) => (base, Some(step)),
                None => (item, None),
            };

            let base = match base.split_once('-') {
                Some((from, to)) => {
                    let from_name = weekday_name(from).unwrap_or(from);
                    // 以 7 结尾的区间会跨过周六，拆成两段
                    match (to, step) {
                        ("7", None) if from_name != "SUN" => format!("{from_name}-SAT,SUN"),
                        ("7", _) => format!("{from_name}-SAT"),
                        _ => format!("{from_name}-{}", weekday_name(to).unwrap_or(to)),
                    }
                }
                None => weekday_name(base).unwrap_or(base).to_string(),
            };

            match step {
                Some(step) => format!("{base}/{step}"),
                None => base,
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}
