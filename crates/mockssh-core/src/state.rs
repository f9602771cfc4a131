// mockssh Channel State Machine
//
// 채널 하나의 라이프사이클을 상태 머신으로 관리
// can_transition_to()로 허용된 전이만 가능하게 강제
//
// 상태 흐름:
//   Open → ExecQueued → Running → Exited
//   Open → SubsystemOpen
//
//   어느 상태에서든 → Closed 전이 가능

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelState {
    Open,
    ExecQueued { command: String },
    Running { pid: Option<u32> },
    Exited { status: u32 },
    SubsystemOpen { name: String },
    Closed,
}

impl ChannelState {
    /// 허용된 다음 상태인지 검증
    pub fn can_transition_to(&self, next: &ChannelState) -> bool {
        use ChannelState::*;
        matches!(
            (self, next),
            (Open, ExecQueued { .. })
            | (ExecQueued { .. }, Running { .. })
            | (Running { .. }, Exited { .. })
            | (Open, SubsystemOpen { .. })
            | (_, Closed)
        ) && *self != Closed
    }
}

#[cfg(test)]
mod tests {
    use super::ChannelState::*;

    #[test]
    fn exec_path_is_allowed() {
        let queued = ExecQueued { command: "echo 42".into() };
        let running = Running { pid: Some(1) };
        assert!(Open.can_transition_to(&queued));
        assert!(queued.can_transition_to(&running));
        assert!(running.can_transition_to(&Exited { status: 0 }));
        assert!(Exited { status: 0 }.can_transition_to(&Closed));
    }

    #[test]
    fn second_exec_and_reopen_are_not() {
        let running = Running { pid: None };
        assert!(!running.can_transition_to(&ExecQueued { command: "ls".into() }));
        assert!(!Open.can_transition_to(&Running { pid: None }));
        assert!(!Closed.can_transition_to(&Open));
        assert!(!Closed.can_transition_to(&Closed));
        assert!(SubsystemOpen { name: "sftp".into() }.can_transition_to(&Closed));
    }
}
