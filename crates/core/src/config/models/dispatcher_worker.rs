use serde::{Deserialize, Serialize};

/// 定时任务存储（调度器）配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// 轮询到期任务的间隔
    pub process_every_seconds: u64,
    /// 同一进程内同时执行的触发回调上限
    pub max_concurrency: usize,
    /// 兼容旧配置，只做校验（必须大于0）。每个调度名只有一条记录且执行期间持锁，
    /// 同名调度天然串行，该值不影响调度
    pub default_concurrency: usize,
    /// 每次轮询最多锁定的任务数，0表示不限制
    pub lock_limit: usize,
    /// 兼容旧配置，不影响调度：同名调度最多只有一把锁
    pub default_lock_limit: usize,
    /// 锁超过该时长视为遗留锁，可以被重新抢占
    pub default_lock_lifetime_seconds: u64,
    /// 启动恢复时每页加载的记录数
    pub load_batch_size: i64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            process_every_seconds: 5,
            max_concurrency: 20,
            default_concurrency: 5,
            lock_limit: 0,
            default_lock_limit: 0,
            default_lock_lifetime_seconds: 600,
            load_batch_size: 100,
        }
    }
}

impl StoreConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.process_every_seconds == 0 {
            return Err(anyhow::anyhow!("轮询间隔必须大于0"));
        }

        if self.max_concurrency == 0 {
            return Err(anyhow::anyhow!("最大并发数必须大于0"));
        }

        if self.default_concurrency == 0 {
            return Err(anyhow::anyhow!("默认并发数必须大于0"));
        }

        if self.default_lock_lifetime_seconds == 0 {
            return Err(anyhow::anyhow!("锁有效期必须大于0"));
        }

        if self.load_batch_size <= 0 {
            return Err(anyhow::anyhow!("加载批次大小必须大于0"));
        }

        Ok(())
    }

    /// 单次轮询允许锁定的任务数
    pub fn effective_lock_limit(&self) -> usize {
        match self.lock_limit {
            0 => self.max_concurrency,
            limit => limit.min(self.max_concurrency),
        }
    }
}

/// 状态回调配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CallbackConfig {
    /// 作为 Authorization 头发送给平台的主令牌
    pub master_token: String,
    pub timeout_seconds: u64,
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self {
            master_token: String::new(),
            timeout_seconds: 10,
        }
    }
}

impl CallbackConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.timeout_seconds == 0 {
            return Err(anyhow::anyhow!("回调超时时间必须大于0"));
        }

        Ok(())
    }
}
