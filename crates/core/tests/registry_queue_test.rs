use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, Utc};

use scheduler_core::{next_fire_time, DueTimeQueue, FinishOutcome, TaskRegistry};
use scheduler_domain::TaskState;
use scheduler_testing_utils::{TaskBuilder, TestEnv};

fn registry() -> Arc<TaskRegistry> {
    Arc::new(TaskRegistry::new(Arc::new(DueTimeQueue::new())))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_adds_keep_dispatch_order() {
    let registry = registry();
    let base = TestEnv::fixed_time();

    let mut handles = Vec::new();
    for id in 1..=200i64 {
        let registry = Arc::clone(&registry);
        handles.push(tokio::spawn(async move {
            let task = TaskBuilder::new()
                .with_id(id)
                .with_fire_time(base + Duration::seconds(id % 7))
                .with_priority((id % 3) as i32)
                .build();
            registry.add(task).await.unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(registry.queue().len().await, 200);

    let listed: Vec<_> = registry
        .list(None)
        .await
        .into_iter()
        .map(|t| (t.next_fire_time, t.priority))
        .collect();

    let mut dispatched = Vec::new();
    while let Some((task, key)) = registry.take_due(base + Duration::minutes(1)).await {
        assert_eq!(task.definition.next_fire_time, key.fire_time);
        dispatched.push((key.fire_time, key.priority));
    }

    assert_eq!(dispatched.len(), 200);
    assert!(dispatched.windows(2).all(|pair| pair[0] <= pair[1]));
    assert_eq!(listed, dispatched);
    assert!(registry.queue().is_empty().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_remove_and_take_due_never_double_claims() {
    let registry = registry();
    let now = Utc::now();
    for id in 1..=100i64 {
        registry
            .add(TaskBuilder::new().with_id(id).with_fire_time(now).build())
            .await
            .unwrap();
    }

    let remover = {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            let mut removed = HashSet::new();
            for id in (1..=100i64).filter(|id| id % 2 == 0) {
                if registry.get(id).await.map(|t| t.state) == Some(TaskState::Pending)
                    && registry.remove(id).await
                {
                    removed.insert(id);
                }
            }
            removed
        })
    };
    let taker = {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            let mut taken = HashSet::new();
            while let Some((task, _)) = registry.take_due(Utc::now()).await {
                assert!(taken.insert(task.id()));
            }
            taken
        })
    };

    let removed = remover.await.unwrap();
    let taken = taker.await.unwrap();

    // 被删除的待执行任务不会再被取出
    for id in &removed {
        if !taken.contains(id) {
            assert!(registry.status(*id).await.is_none());
        }
    }
    for id in &taken {
        assert_eq!(
            registry.status(*id).await.map(|s| s.state),
            if removed.contains(id) { None } else { Some(TaskState::Running) }
        );
    }
    assert!(registry.queue().is_empty().await);
}

#[tokio::test]
async fn test_recurring_cycle_through_registry() {
    let registry = registry();
    let expr = "*/5 * * * * *";
    let first = next_fire_time(expr, Utc::now()).unwrap();
    registry
        .add(TaskBuilder::new().with_id(1).with_cron(expr).with_fire_time(first).build())
        .await
        .unwrap();

    let mut fire = first;
    for cycle in 1..=3u32 {
        let (task, key) = registry.take_due(fire).await.unwrap();
        assert_eq!(key.fire_time, fire);
        assert_eq!(registry.record_attempt(task.id(), fire).await.unwrap(), cycle);

        let next = next_fire_time(expr, fire).unwrap();
        assert_eq!(next - fire, Duration::seconds(5));
        let outcome = registry
            .finish_execution(task.id(), TaskState::Succeeded, Some(next))
            .await
            .unwrap();
        assert_eq!(outcome, FinishOutcome::Rescheduled(next));

        let status = registry.status(1).await.unwrap();
        assert_eq!(status.state, TaskState::Pending);
        assert_eq!(status.execution_count, cycle);
        fire = next;
    }
}
