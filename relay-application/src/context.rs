use bon::Builder;

/// 一次管理调用的横切信息
///
/// - `actor`：执行者（审计日志中记录）；
/// - `correlation_id`：链路追踪标识，贯穿日志。
///
/// ```rust
/// use relay_application::context::AppContext;
///
/// let ctx = AppContext::builder()
///     .actor("admin")
///     .correlation_id("cor-123")
///     .build();
/// assert_eq!(ctx.actor.as_deref(), Some("admin"));
/// ```
#[derive(Clone, Debug, Default, Builder)]
pub struct AppContext {
    #[builder(into)]
    pub actor: Option<String>,
    #[builder(into)]
    pub correlation_id: Option<String>,
}
