//! Performance benchmarks for admission and pairing

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use flowmatch::config::MatchmakingSettings;
use flowmatch::matching::probe_targets;
use flowmatch::metrics::MetricsCollector;
use flowmatch::room::{RoomAssignment, RoomHandoff};
use flowmatch::service::MatchmakingCore;
use flowmatch::types::{EnterRequest, Gender, Intent, Preference, Profile};
use flowmatch::MatchmakingManager;
use std::sync::Arc;

// Hand-off that drops every room
#[derive(Debug, Clone)]
struct BenchRoomHandoff;

#[async_trait::async_trait]
impl RoomHandoff for BenchRoomHandoff {
    async fn hand_off(&self, _assignment: &RoomAssignment) -> flowmatch::error::Result<()> {
        Ok(())
    }
}

fn create_bench_system() -> Arc<MatchmakingManager> {
    let settings = MatchmakingSettings {
        daily_limit: u32::MAX,
        ..MatchmakingSettings::default()
    };
    let metrics = Arc::new(MetricsCollector::new().unwrap());

    MatchmakingCore::build(&settings, Arc::new(BenchRoomHandoff), metrics).manager
}

fn request(device_id: String, gender: Gender, preference: Preference) -> EnterRequest {
    EnterRequest {
        device_id,
        gender: Some(gender.to_string()),
        preference: Some(preference.to_string()),
        profile: Profile::default(),
    }
}

fn bench_probe_table(c: &mut Criterion) {
    c.bench_function("probe_targets_all_intents", |b| {
        b.iter(|| {
            for intent in Intent::all() {
                black_box(probe_targets(black_box(intent)));
            }
        })
    });
}

fn bench_reciprocal_pair(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let manager = create_bench_system();
    let mut round = 0u64;

    c.bench_function("reciprocal_pair", |b| {
        b.to_async(&rt).iter(|| {
            round += 1;
            let manager = manager.clone();
            async move {
                manager
                    .try_enter_and_match(request(
                        format!("a-{}", round),
                        Gender::Male,
                        Preference::Female,
                    ))
                    .await
                    .unwrap();
                black_box(
                    manager
                        .try_enter_and_match(request(
                            format!("b-{}", round),
                            Gender::Female,
                            Preference::Male,
                        ))
                        .await
                        .unwrap(),
                )
            }
        })
    });
}

fn bench_mixed_burst(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("mixed_burst_90_devices", |b| {
        b.iter(|| {
            rt.block_on(async {
                let manager = create_bench_system();

                // Every gender and preference combination, ten times over
                for i in 0..90 {
                    let gender = Gender::ALL[i % 3];
                    let preference = Preference::ALL[(i / 3) % 3];
                    let _ = manager
                        .try_enter_and_match(request(format!("device-{}", i), gender, preference))
                        .await;
                }

                black_box(manager.get_stats().await.unwrap())
            })
        })
    });
}

criterion_group!(
    benches,
    bench_probe_table,
    bench_reciprocal_pair,
    bench_mixed_burst
);
criterion_main!(benches);
