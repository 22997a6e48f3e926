use std::sync::Arc;
use std::time::Duration;

use pagetile::cache::{ImageCache, RgbaBackend};
use pagetile::collector::{CollectorConfig, TileCollector, TileSpec};
use pagetile::synthetic::SyntheticDecoder;
use pagetile::test_utils::wait_until;
use pagetile::tiles::{IntSize, RectF, Size, TileGridCache};

const TIMEOUT: Duration = Duration::from_secs(10);

#[test]
fn visible_tiles_flow_from_collector_into_cache() {
    let mut grids = TileGridCache::new(256);
    let grid = grids.grid(2.0, Size::new(600.0, 800.0), IntSize::new(600, 800));
    let fine = grid.sample_size_for_zoom(1.0);
    let viewport = RectF::new(0.0, 0.0, 600.0, 800.0);

    let specs: Vec<_> = std::iter::once(TileSpec::from_tile(0, &grid.base))
        .chain(
            grid.tiles_intersecting(fine, &viewport)
                .map(|tile| TileSpec::from_tile(0, tile)),
        )
        .collect();
    assert!(specs.len() > 1);

    let cache = ImageCache::new(Arc::new(RgbaBackend));
    let (collector, output) =
        TileCollector::spawn(Arc::new(SyntheticDecoder::new(1)), CollectorConfig::new(3)).unwrap();
    let sent = collector.request_all(specs.iter().copied()).unwrap();

    for _ in 0..sent {
        let tile = output.recv_timeout(TIMEOUT).unwrap();
        let image = tile.image.expect("synthetic decode never fails in range");
        assert_eq!(image.dimensions(), tile.spec.output_size());
        if tile.spec.sample_size == grid.base.sample_size {
            cache.put_page(tile.spec.cache_key(), image);
        } else {
            cache.put_node(tile.spec.cache_key(), image);
        }
    }
    assert!(wait_until(TIMEOUT, || collector.is_idle()));

    assert!(cache.acquire_page(&specs[0].cache_key()).is_some());
    for spec in &specs[1..] {
        assert!(cache.acquire_node(&spec.cache_key()).is_some(), "{spec} cached");
    }
    let stats = cache.stats();
    assert_eq!(stats.page.entries, 1);
    assert_eq!(stats.node.entries, specs.len() - 1);
}

#[test]
fn out_of_range_pages_come_back_empty() {
    let (collector, output) =
        TileCollector::spawn(Arc::new(SyntheticDecoder::new(2)), CollectorConfig::new(2)).unwrap();

    let grid = TileGridCache::new(128).grid(1.0, Size::new(256.0, 256.0), IntSize::new(256, 256));
    collector
        .request_all([TileSpec::from_tile(1, &grid.base), TileSpec::from_tile(5, &grid.base)])
        .unwrap();

    let mut results: Vec<_> = (0..2)
        .map(|_| output.recv_timeout(TIMEOUT).unwrap())
        .collect();
    results.sort_by_key(|tile| tile.spec.page);
    assert!(!results[0].is_empty());
    assert!(results[1].is_empty());
    assert!(wait_until(TIMEOUT, || collector.is_idle()));
}

#[test]
fn dropping_the_collector_stops_it() {
    let (collector, output) =
        TileCollector::spawn(Arc::new(SyntheticDecoder::new(1)), CollectorConfig::new(1)).unwrap();
    drop(collector);
    assert!(output.recv_timeout(TIMEOUT).is_err());
}
