//! 会话调度：从「星期集合 + 本地时间窗口」计算下一次应开始的会话
//!
//! 纯函数，无副作用。窗口边界按本地墙上时间比较（而非累计时长），因此夏令时切换当天依然正确：
//! 本地时间落在 DST 间隙里时顺延到间隙之后，重复的本地时间取较早的那一个。
//! 回拨当天窗口已结束后，重复的那一小时不会让同一窗口再次打开。

use chrono::{
    DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone,
    Utc, Weekday,
};

/// 一次会话的时间窗口（已换算为 UTC 时刻）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleWindow {
    /// 会话所属的本地日期
    pub scheduled_date: NaiveDate,
    pub start: DateTime<Utc>,
    /// 主帖发布时刻（窗口开始 + 固定偏移）
    pub main_post: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ScheduleWindow {
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        self.start <= now && now < self.end
    }
}

/// 调度器：星期集合 + [start, end) 本地时间窗口
#[derive(Debug, Clone)]
pub struct Scheduler<Tz: TimeZone> {
    tz: Tz,
    weekdays: Vec<Weekday>,
    window_start: NaiveTime,
    main_post: NaiveTime,
    window_end: NaiveTime,
}

impl<Tz: TimeZone> Scheduler<Tz> {
    /// `main_post_offset` 需落在窗口内（由配置校验保证）
    pub fn new(
        tz: Tz,
        weekdays: Vec<Weekday>,
        window_start: NaiveTime,
        main_post_offset: Duration,
        window_end: NaiveTime,
    ) -> Self {
        let (main_post, _) = window_start.overflowing_add_signed(main_post_offset);
        Self {
            tz,
            weekdays,
            window_start,
            main_post,
            window_end,
        }
    }

    pub fn weekdays(&self) -> &[Weekday] {
        &self.weekdays
    }

    /// 该日期在星期列表中的位置（用于选题）
    pub fn weekday_position(&self, date: NaiveDate) -> Option<usize> {
        self.weekdays.iter().position(|d| *d == date.weekday())
    }

    /// 指定日期的窗口；该日不在星期集合中时返回 None
    pub fn window_for(&self, date: NaiveDate) -> Option<ScheduleWindow> {
        self.weekday_position(date)?;
        Some(self.window_on(date))
    }

    /// 不检查星期集合的窗口（恢复已存在的会话时使用，配置可能已变）
    pub fn window_on(&self, date: NaiveDate) -> ScheduleWindow {
        ScheduleWindow {
            scheduled_date: date,
            start: self.resolve(date.and_time(self.window_start)),
            main_post: self.resolve(date.and_time(self.main_post)),
            end: self.resolve(date.and_time(self.window_end)),
        }
    }

    /// `now` 所在的窗口（本地墙上时间比较，且须落在换算后的 UTC 区间内）
    pub fn window_containing(&self, now: DateTime<Utc>) -> Option<ScheduleWindow> {
        let local = now.with_timezone(&self.tz).naive_local();
        let time = local.time();
        if time < self.window_start || time >= self.window_end {
            return None;
        }
        self.window_for(local.date()).filter(|w| w.contains(now))
    }

    /// 下一个到期的窗口：若 `now` 已在某窗口内且当天尚未创建会话，返回当前窗口；
    /// 否则返回开始时刻不早于 `now`、且对应日期尚无会话的最近窗口
    pub fn next_due(
        &self,
        now: DateTime<Utc>,
        session_exists: impl Fn(NaiveDate) -> bool,
    ) -> Option<ScheduleWindow> {
        if let Some(current) = self.window_containing(now) {
            if !session_exists(current.scheduled_date) {
                return Some(current);
            }
        }
        if self.weekdays.is_empty() {
            return None;
        }

        let today = now.with_timezone(&self.tz).date_naive();
        // 两周足以覆盖「本周该日已有会话」的情况
        (0..=14)
            .filter_map(|offset| today.checked_add_signed(Duration::days(offset)))
            .filter_map(|date| self.window_for(date))
            .find(|w| w.start >= now && !session_exists(w.scheduled_date))
    }

    fn resolve(&self, naive: NaiveDateTime) -> DateTime<Utc> {
        match self.tz.from_local_datetime(&naive) {
            LocalResult::Single(t) => t.with_timezone(&Utc),
            LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
            LocalResult::None => {
                // 落在 DST 间隙：逐分钟顺延到第一个存在的本地时刻
                (1..=180)
                    .filter_map(|m| {
                        self.tz
                            .from_local_datetime(&(naive + Duration::minutes(m)))
                            .earliest()
                    })
                    .next()
                    .map(|t| t.with_timezone(&Utc))
                    .unwrap_or_else(|| Utc.from_utc_datetime(&naive))
            }
        }
    }
}
