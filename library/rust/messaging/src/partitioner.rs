use std::sync::atomic::{AtomicUsize, Ordering};

/// Partitioner はメッセージキーから送信先パーティションを決める。
/// 同じキーと同じパーティション数に対しては常に同じ結果を返さなければならない。
pub trait Partitioner: Send + Sync {
    fn partition(&self, key: &[u8], partitions: i32) -> i32;
}

/// HashPartitioner はキーの FNV-1a (32bit) ハッシュでパーティションを決める。
/// librdkafka の `fnv1a_random` と同じく、空キーはラウンドロビンで振り分ける。
///
/// segmentio/kafka-go の `Hash` バランサーとは結果が一致しない。
/// - kafka-go は `abs(int32(hash) % n)` と符号付きで剰余を取るため、
///   ハッシュの最上位ビットが立つキーでは別のパーティションになりうる。
/// - kafka-go は空キーもハッシュして固定パーティションに送る。
///
/// 同じトピックに Go と Rust のプロデューサーが混在すると、一部のキーで
/// キー単位の順序保証が失われる。user_id なしの `publish_with_meta` も同様。
#[derive(Debug, Default)]
pub struct HashPartitioner {
    round_robin: AtomicUsize,
}

impl HashPartitioner {
    pub fn new() -> Self {
        Self::default()
    }
}

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

fn fnv1a(key: &[u8]) -> u32 {
    key.iter().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u32::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}

impl Partitioner for HashPartitioner {
    fn partition(&self, key: &[u8], partitions: i32) -> i32 {
        let count = u32::try_from(partitions.max(1)).unwrap_or(1);
        let slot = if key.is_empty() {
            // usize -> u32 の切り詰めはラウンドロビン用途では問題にならない
            #[allow(clippy::cast_possible_truncation)]
            let next = self.round_robin.fetch_add(1, Ordering::Relaxed) as u32;
            next % count
        } else {
            fnv1a(key) % count
        };
        i32::try_from(slot).unwrap_or(0)
    }
}
