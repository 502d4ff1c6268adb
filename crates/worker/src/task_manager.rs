//! 任务生命周期管理器
//!
//! 每个入站请求创建一个 [`TaskManager`]，按顺序驱动定时任务存储，记录带耗时的操作日志，
//! 结束后把日志报告给请求携带的回调地址。任意一个任务失败都会中止剩余任务。

use std::sync::Arc;

use tracing::{debug, instrument};

use scheduler_core::{
    models::{
        schedule_name, LogEntry, LogStatus, OperationLog, ScheduleDefinition, StatusReport,
        TaskOperation, TaskRequest, TaskSpec,
    },
    traits::{ReportOutcome, ScheduleRegistry, StatusReporter},
    Result, SchedulerError,
};

/// 一次生命周期操作的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationResult {
    pub success: bool,
    pub error: Option<String>,
}

impl OperationResult {
    fn succeeded() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    fn failed(error: &SchedulerError) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
        }
    }
}

struct Messages {
    started: &'static str,
    completed: &'static str,
    failed: &'static str,
}

const DEPLOY: Messages = Messages {
    started: "Started scheduling cron jobs",
    completed: "Completed cron job scheduling successfully",
    failed: "Cron job scheduling failed",
};

const REDEPLOY: Messages = Messages {
    started: "Started rescheduling cron jobs",
    completed: "Completed cron job rescheduling successfully",
    failed: "Cron job scheduling failed",
};

const UNDEPLOY: Messages = Messages {
    started: "Started cancelling cron jobs",
    completed: "Completed cron job cancellation successfully",
    failed: "Cron job cancellation failed",
};

const DELETE: Messages = Messages {
    started: "Started cancelling all cron jobs",
    completed: "Completed cancellation of all cron jobs successfully",
    failed: "All cron jobs cancellation failed",
};

pub struct TaskManager {
    request: TaskRequest,
    registry: Arc<dyn ScheduleRegistry>,
    reporter: Arc<dyn StatusReporter>,
    log: OperationLog,
}

impl TaskManager {
    pub fn new(
        request: TaskRequest,
        registry: Arc<dyn ScheduleRegistry>,
        reporter: Arc<dyn StatusReporter>,
    ) -> Self {
        Self {
            request,
            registry,
            reporter,
            log: OperationLog::new(),
        }
    }

    pub fn request(&self) -> &TaskRequest {
        &self.request
    }

    pub fn logs(&self) -> &[LogEntry] {
        self.log.entries()
    }

    /// 追加一条操作日志，耗时相对上一条计算
    pub fn add_log(&mut self, message: impl Into<String>, status: LogStatus) {
        self.log.add(message, status);
    }

    /// 按请求类型执行对应的操作
    pub async fn execute(&mut self) -> OperationResult {
        match self.request.operation() {
            TaskOperation::Deploy => self.deploy_tasks().await,
            TaskOperation::Redeploy => self.redeploy_tasks().await,
            TaskOperation::Undeploy => self.undeploy_tasks().await,
            TaskOperation::Delete => self.delete_tasks().await,
        }
    }

    /// 逐个注册任务的调度
    #[instrument(skip(self), fields(env_id = %self.request.env().iid))]
    pub async fn deploy_tasks(&mut self) -> OperationResult {
        self.add_log(DEPLOY.started, LogStatus::Ok);
        let result = self.register_all().await;
        self.finish(result, &DEPLOY).await
    }

    /// 逐个取消再重新注册，使新的 cron 表达式和任务数据生效
    #[instrument(skip(self), fields(env_id = %self.request.env().iid))]
    pub async fn redeploy_tasks(&mut self) -> OperationResult {
        self.add_log(REDEPLOY.started, LogStatus::Ok);
        let result = self.reinstall_all().await;
        self.finish(result, &REDEPLOY).await
    }

    #[instrument(skip(self), fields(env_id = %self.request.env().iid))]
    pub async fn undeploy_tasks(&mut self) -> OperationResult {
        self.add_log(UNDEPLOY.started, LogStatus::Ok);
        let result = self.cancel_all().await;
        self.finish(result, &UNDEPLOY).await
    }

    /// 按环境前缀一次性取消该环境的全部调度
    #[instrument(skip(self), fields(env_id = %self.request.env().iid))]
    pub async fn delete_tasks(&mut self) -> OperationResult {
        self.add_log(DELETE.started, LogStatus::Ok);
        let result = self
            .registry
            .cancel_schedules_by_prefix(&self.request.env().iid)
            .await
            .map(|cancelled| debug!("已取消 {} 个调度", cancelled));
        self.finish(result, &DELETE).await
    }

    /// 请求未携带回调地址时返回 `None`
    pub async fn send_environment_logs(&self, status: LogStatus) -> Option<ReportOutcome> {
        let Some(url) = self.request.callback() else {
            debug!("请求未携带回调地址，跳过状态报告");
            return None;
        };

        let report = StatusReport {
            status,
            logs: self.log.entries().to_vec(),
        };
        Some(self.reporter.report(url, &report).await)
    }

    async fn register_all(&self) -> Result<()> {
        let env_id = &self.request.env().iid;
        for task in self.request.tasks() {
            self.registry
                .register_schedule(definition(env_id, task))
                .await?;
        }
        Ok(())
    }

    async fn reinstall_all(&self) -> Result<()> {
        let env_id = &self.request.env().iid;
        for task in self.request.tasks() {
            self.registry
                .cancel_schedule(&schedule_name(env_id, &task.iid))
                .await?;
            self.registry
                .register_schedule(definition(env_id, task))
                .await?;
        }
        Ok(())
    }

    async fn cancel_all(&self) -> Result<()> {
        let env_id = &self.request.env().iid;
        for task in self.request.tasks() {
            self.registry
                .cancel_schedule(&schedule_name(env_id, &task.iid))
                .await?;
        }
        Ok(())
    }

    async fn finish(&mut self, result: Result<()>, messages: &Messages) -> OperationResult {
        match result {
            Ok(()) => {
                self.add_log(messages.completed, LogStatus::Ok);
                self.send_environment_logs(LogStatus::Ok).await;
                OperationResult::succeeded()
            }
            Err(e) => {
                self.add_log(failure_message(messages.failed, &e), LogStatus::Error);
                self.send_environment_logs(LogStatus::Error).await;
                OperationResult::failed(&e)
            }
        }
    }
}

fn definition(env_id: &str, task: &TaskSpec) -> ScheduleDefinition {
    ScheduleDefinition::new(
        env_id,
        &task.iid,
        &task.name,
        &task.cron_expression,
        task.timezone.as_deref(),
    )
}

/// 标题、错误类型、错误信息、错误来源链，按行拼接
fn failure_message(title: &str, error: &SchedulerError) -> String {
    let mut parts = vec![
        title.to_string(),
        error.kind().to_string(),
        error.to_string(),
    ];
    let chain = error.source_chain();
    if !chain.is_empty() {
        parts.push(chain);
    }
    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeRegistry {
        calls: Mutex<Vec<String>>,
        registered: Mutex<Vec<ScheduleDefinition>>,
        fail_on: Option<String>,
    }

    impl FakeRegistry {
        fn failing_on(name: &str) -> Self {
            Self {
                fail_on: Some(name.to_string()),
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn registered_names(&self) -> Vec<String> {
            self.registered
                .lock()
                .unwrap()
                .iter()
                .map(|d| d.name.clone())
                .collect()
        }

        fn check(&self, call: String, name: &str) -> Result<()> {
            self.calls.lock().unwrap().push(call);
            if self.fail_on.as_deref() == Some(name) {
                return Err(SchedulerError::DatabaseOperation(format!(
                    "写入 {name} 失败"
                )));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl ScheduleRegistry for FakeRegistry {
        async fn register_schedule(&self, definition: ScheduleDefinition) -> Result<()> {
            self.check(format!("register {}", definition.name), &definition.name)?;
            self.registered.lock().unwrap().push(definition);
            Ok(())
        }

        async fn cancel_schedule(&self, name: &str) -> Result<()> {
            self.check(format!("cancel {name}"), name)
        }

        async fn cancel_schedules_by_prefix(&self, env_id: &str) -> Result<u64> {
            self.check(format!("cancel-prefix {env_id}"), env_id)?;
            Ok(3)
        }
    }

    #[derive(Default)]
    struct RecordingReporter {
        reports: Mutex<Vec<(String, StatusReport)>>,
    }

    #[async_trait]
    impl StatusReporter for RecordingReporter {
        async fn report(&self, callback_url: &str, report: &StatusReport) -> ReportOutcome {
            self.reports
                .lock()
                .unwrap()
                .push((callback_url.to_string(), report.clone()));
            ReportOutcome::Delivered
        }
    }

    fn request(operation: TaskOperation, task_ids: &[&str], callback: Option<&str>) -> TaskRequest {
        let tasks: Vec<serde_json::Value> = task_ids
            .iter()
            .map(|id| {
                serde_json::json!({
                    "iid": id,
                    "name": format!("task {id}"),
                    "cronExpression": "0 0 * * *",
                    "timezone": "Europe/Istanbul"
                })
            })
            .collect();
        let mut body = serde_json::json!({
            "app": { "name": "shop" },
            "env": {
                "iid": "e1",
                "orgId": "o1",
                "appId": "a1",
                "versionId": "v1",
                "name": "production",
                "version": { "name": "v1" }
            },
            "tasks": tasks
        });
        if let Some(url) = callback {
            body["schedulerCallback"] = serde_json::json!(url);
        }
        TaskRequest::parse(operation, &serde_json::to_vec(&body).unwrap()).unwrap()
    }

    fn manager(
        request: TaskRequest,
        registry: Arc<FakeRegistry>,
        reporter: Arc<RecordingReporter>,
    ) -> TaskManager {
        TaskManager::new(request, registry, reporter)
    }

    fn messages(manager: &TaskManager) -> Vec<String> {
        manager.logs().iter().map(|e| e.message.clone()).collect()
    }

    #[tokio::test]
    async fn test_deploy_registers_every_task_in_order() {
        let registry = Arc::new(FakeRegistry::default());
        let reporter = Arc::new(RecordingReporter::default());
        let mut manager = manager(
            request(TaskOperation::Deploy, &["t1", "t2"], Some("http://platform/cb")),
            registry.clone(),
            reporter.clone(),
        );

        let result = manager.deploy_tasks().await;

        assert!(result.success);
        assert!(result.error.is_none());
        assert_eq!(registry.calls(), vec!["register e1.t1", "register e1.t2"]);

        let definitions = registry.registered.lock().unwrap().clone();
        assert_eq!(definitions[0].data.task_name, "task t1");
        assert_eq!(definitions[0].timezone.as_deref(), Some("Europe/Istanbul"));

        assert_eq!(
            messages(&manager),
            vec![
                "Started scheduling cron jobs",
                "Completed cron job scheduling successfully"
            ]
        );
        assert_eq!(manager.logs()[0].duration, 0);

        let reports = reporter.reports.lock().unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].0, "http://platform/cb");
        assert_eq!(reports[0].1.status, LogStatus::Ok);
        assert_eq!(reports[0].1.logs.len(), 2);
    }

    #[tokio::test]
    async fn test_deploy_stops_at_first_failure() {
        let registry = Arc::new(FakeRegistry::failing_on("e1.B"));
        let reporter = Arc::new(RecordingReporter::default());
        let mut manager = manager(
            request(TaskOperation::Deploy, &["A", "B", "C"], Some("http://platform/cb")),
            registry.clone(),
            reporter.clone(),
        );

        let result = manager.deploy_tasks().await;

        assert!(!result.success);
        assert!(result.error.unwrap().contains("写入 e1.B 失败"));
        assert_eq!(registry.registered_names(), vec!["e1.A"]);
        assert_eq!(registry.calls(), vec!["register e1.A", "register e1.B"]);

        let last = manager.logs().last().unwrap();
        assert_eq!(last.status, LogStatus::Error);
        let lines: Vec<&str> = last.message.lines().collect();
        assert_eq!(lines[0], "Cron job scheduling failed");
        assert_eq!(lines[1], "DatabaseOperationError");

        let reports = reporter.reports.lock().unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].1.status, LogStatus::Error);
    }

    #[tokio::test]
    async fn test_redeploy_cancels_before_registering() {
        let registry = Arc::new(FakeRegistry::default());
        let reporter = Arc::new(RecordingReporter::default());
        let mut manager = manager(
            request(TaskOperation::Redeploy, &["t1", "t2"], None),
            registry.clone(),
            reporter,
        );

        let result = manager.redeploy_tasks().await;

        assert!(result.success);
        assert_eq!(
            registry.calls(),
            vec![
                "cancel e1.t1",
                "register e1.t1",
                "cancel e1.t2",
                "register e1.t2"
            ]
        );
        assert_eq!(
            messages(&manager),
            vec![
                "Started rescheduling cron jobs",
                "Completed cron job rescheduling successfully"
            ]
        );
    }

    #[tokio::test]
    async fn test_redeploy_failure_uses_scheduling_title() {
        let registry = Arc::new(FakeRegistry::failing_on("e1.t1"));
        let mut manager = manager(
            request(TaskOperation::Redeploy, &["t1", "t2"], None),
            registry.clone(),
            Arc::new(RecordingReporter::default()),
        );

        let result = manager.redeploy_tasks().await;

        assert!(!result.success);
        // 取消阶段就失败了，不会继续注册
        assert_eq!(registry.calls(), vec!["cancel e1.t1"]);
        let last = manager.logs().last().unwrap();
        assert!(last.message.starts_with("Cron job scheduling failed\n"));
    }

    #[tokio::test]
    async fn test_undeploy_only_cancels() {
        let registry = Arc::new(FakeRegistry::default());
        let mut manager = manager(
            request(TaskOperation::Undeploy, &["t1", "t2"], None),
            registry.clone(),
            Arc::new(RecordingReporter::default()),
        );

        assert!(manager.undeploy_tasks().await.success);
        assert_eq!(registry.calls(), vec!["cancel e1.t1", "cancel e1.t2"]);
        assert!(registry.registered_names().is_empty());
        assert_eq!(
            messages(&manager),
            vec![
                "Started cancelling cron jobs",
                "Completed cron job cancellation successfully"
            ]
        );
    }

    #[tokio::test]
    async fn test_delete_uses_environment_prefix() {
        let registry = Arc::new(FakeRegistry::default());
        let mut manager = manager(
            request(TaskOperation::Delete, &[], None),
            registry.clone(),
            Arc::new(RecordingReporter::default()),
        );

        assert!(manager.delete_tasks().await.success);
        assert_eq!(registry.calls(), vec!["cancel-prefix e1"]);
        assert_eq!(
            messages(&manager),
            vec![
                "Started cancelling all cron jobs",
                "Completed cancellation of all cron jobs successfully"
            ]
        );
    }

    #[tokio::test]
    async fn test_delete_failure_title() {
        let registry = Arc::new(FakeRegistry::failing_on("e1"));
        let mut manager = manager(
            request(TaskOperation::Delete, &[], None),
            registry,
            Arc::new(RecordingReporter::default()),
        );

        assert!(!manager.delete_tasks().await.success);
        let last = manager.logs().last().unwrap();
        assert!(last.message.starts_with("All cron jobs cancellation failed\n"));
        assert_eq!(last.status, LogStatus::Error);
    }

    #[tokio::test]
    async fn test_no_callback_means_no_report() {
        let reporter = Arc::new(RecordingReporter::default());
        let mut manager = manager(
            request(TaskOperation::Deploy, &["t1"], None),
            Arc::new(FakeRegistry::default()),
            reporter.clone(),
        );

        assert!(manager.execute().await.success);
        assert!(manager.send_environment_logs(LogStatus::Ok).await.is_none());
        assert!(reporter.reports.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_execute_dispatches_by_request_type() {
        let registry = Arc::new(FakeRegistry::default());
        let mut manager = manager(
            request(TaskOperation::Undeploy, &["t1"], None),
            registry.clone(),
            Arc::new(RecordingReporter::default()),
        );

        manager.execute().await;
        assert_eq!(registry.calls(), vec!["cancel e1.t1"]);
        assert_eq!(manager.request().operation(), TaskOperation::Undeploy);
    }

    #[test]
    fn test_failure_message_includes_source_chain() {
        let err = SchedulerError::Database(sqlx::Error::RowNotFound);
        let message = failure_message("Cron job scheduling failed", &err);
        let lines: Vec<&str> = message.lines().collect();
        assert_eq!(lines[0], "Cron job scheduling failed");
        assert_eq!(lines[1], "DatabaseError");
        assert!(lines.len() >= 3);
    }
}
