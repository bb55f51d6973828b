//! Property-based tests for shard admission

use std::sync::Arc;

use chatshard::backend::services::Services;
use chatshard::backend::shard::ShardPool;
use chatshard::shared::ChatConfig;
use proptest::prelude::*;

fn admit_all(config: ChatConfig, connections: usize) -> (usize, Vec<usize>) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    runtime.block_on(async move {
        let pool = ShardPool::new(Arc::new(config), Services::in_memory());
        for n in 0..connections {
            pool.admit(&format!("user-{n}")).await.unwrap();
        }
        let size = pool.size().await;
        let loads = pool.shards().await.iter().map(|shard| shard.load()).collect();
        pool.shutdown();
        (size, loads)
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn test_fixed_pool_stays_balanced(shards in 1usize..6, connections in 0usize..60) {
        let config = ChatConfig::builder()
            .shards(shards, shards)
            .load_threshold(1000)
            .processors(1)
            .build()
            .unwrap();
        let (size, loads) = admit_all(config, connections);

        prop_assert_eq!(size, shards);
        prop_assert_eq!(loads.iter().sum::<usize>(), connections);
        let max = loads.iter().copied().max().unwrap_or(0);
        let min = loads.iter().copied().min().unwrap_or(0);
        prop_assert!(max - min <= 1, "loads {:?}", loads);
    }

    #[test]
    fn test_pool_grows_one_shard_per_saturation(
        initial in 1usize..4,
        extra in 0usize..4,
        threshold in 1usize..6,
        connections in 1usize..60,
    ) {
        let max = initial + extra;
        let config = ChatConfig::builder()
            .shards(initial, max)
            .load_threshold(threshold)
            .processors(1)
            .build()
            .unwrap();
        let (size, loads) = admit_all(config, connections);

        prop_assert_eq!(size, connections.div_ceil(threshold).clamp(initial, max));
        prop_assert_eq!(loads.iter().sum::<usize>(), connections);
    }
}
