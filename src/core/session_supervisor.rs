//! 会话监管：生命周期、取消
//!
//! 根 token 随进程存活；每个对话会话持有一个子 token。开始新对话时取消旧会话的 token，
//! 正在进行的流或生图请求会在下一个挂起点停止并被丢弃；退出时取消根 token。

use tokio_util::sync::CancellationToken;

/// 会话级生命周期管理
#[derive(Debug)]
pub struct SessionSupervisor {
    /// 退出应用时触发
    root: CancellationToken,
    /// 当前会话
    session: CancellationToken,
    generation: u64,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        let root = CancellationToken::new();
        let session = root.child_token();
        Self {
            root,
            session,
            generation: 0,
        }
    }

    /// 当前会话的 token（clone 共享同一取消状态）
    pub fn session_token(&self) -> CancellationToken {
        self.session.clone()
    }

    /// 取消当前会话并换上新的子 token
    pub fn renew(&mut self) -> CancellationToken {
        self.session.cancel();
        self.session = self.root.child_token();
        self.generation += 1;
        tracing::debug!(generation = self.generation, "session token renewed");
        self.session.clone()
    }

    /// 已替换过几次会话
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// 退出：取消根 token（所有会话随之取消）
    pub fn shutdown(&self) {
        self.root.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.root.is_cancelled()
    }
}

impl Default for SessionSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_renew_cancels_previous_session_only() {
        let mut supervisor = SessionSupervisor::new();
        let old = supervisor.session_token();
        let fresh = supervisor.renew();
        assert!(old.is_cancelled());
        assert!(!fresh.is_cancelled());
        assert_eq!(supervisor.generation(), 1);
    }

    #[test]
    fn test_shutdown_cancels_current_session() {
        let supervisor = SessionSupervisor::new();
        let token = supervisor.session_token();
        supervisor.shutdown();
        assert!(token.is_cancelled());
        assert!(supervisor.is_shut_down());
    }
}
