//! End-to-end behaviour of the atlas cache against the in-memory backend

use atlas_sleep_cache::{AtlasCache, AtlasError, CacheConfig, MemoryBackend, TextureId};
use atlas_sleep_storage::{AtlasDescriptor, DescriptorError, DescriptorTable};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

const TAGS: [&str; 3] = ["ui_icons", "hud", "menu"];

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn ui_icons_table() -> DescriptorTable {
    DescriptorTable::new(vec![AtlasDescriptor::new(
        1,
        "ui_icons",
        "atlases/icons",
        ["gear", "star"],
    )])
    .unwrap()
}

fn ui_icons_cache() -> AtlasCache<MemoryBackend> {
    init_logging();
    let backend = MemoryBackend::new().with_atlas("atlases/icons", ["gear", "star"]);
    AtlasCache::new(Arc::new(ui_icons_table()), backend, &CacheConfig::default())
}

fn three_atlas_cache() -> AtlasCache<MemoryBackend> {
    init_logging();
    let table = DescriptorTable::new(vec![
        AtlasDescriptor::new(1, "ui_icons", "atlases/icons", ["gear", "star"]),
        AtlasDescriptor::new(2, "hud", "atlases/hud", ["health", "ammo"]),
        AtlasDescriptor::new(3, "menu", "atlases/menu", ["play", "quit"]),
    ])
    .unwrap();
    let backend = MemoryBackend::new()
        .with_atlas("atlases/icons", ["gear", "star"])
        .with_atlas("atlases/hud", ["health", "ammo"])
        .with_atlas("atlases/menu", ["play", "quit"]);
    AtlasCache::new(
        Arc::new(table),
        backend,
        &CacheConfig::default().with_strict_pools(true),
    )
}

fn representative_texture(cache: &AtlasCache<MemoryBackend>, tag: &str) -> Option<TextureId> {
    cache.info(tag).and_then(|info| info.texture().copied())
}

#[test]
fn test_cold_acquire() {
    let mut cache = ui_icons_cache();

    assert_eq!(cache.acquire("ui_icons").unwrap(), 1);

    assert_eq!(cache.backend().fetches(), ["atlases/icons"]);
    assert_eq!(cache.ref_count("ui_icons"), 1);
    assert!(cache.sprite("ui_icons", "gear").is_some());

    let texture = representative_texture(&cache, "ui_icons").unwrap();
    assert_eq!(cache.resolve_tag(&texture), Some("ui_icons"));
}

#[test]
fn test_shared_then_drained() {
    let mut cache = ui_icons_cache();

    cache.acquire("ui_icons").unwrap();
    assert_eq!(cache.acquire("ui_icons").unwrap(), 2);

    assert_eq!(cache.release("ui_icons"), 1);
    assert!(cache.is_loaded("ui_icons"));
    assert!(cache.sprite("ui_icons", "gear").is_some());

    assert_eq!(cache.release("ui_icons"), 0);
    assert!(!cache.is_loaded("ui_icons"));
    assert!(cache.sprite("ui_icons", "gear").is_none());
    assert_eq!(cache.backend().live_atlas_count(), 0);
    assert_eq!(cache.backend().fetch_count("atlases/icons"), 1);
}

#[test]
fn test_unknown_tag() {
    let mut cache = ui_icons_cache();

    let err = cache.acquire("does_not_exist").unwrap_err();
    assert!(matches!(err, AtlasError::UnknownTag(ref tag) if tag == "does_not_exist"));
    assert_eq!(cache.loaded_tags().count(), 0);
    assert!(cache.backend().fetches().is_empty());

    assert_eq!(cache.acquire("ui_icons").unwrap(), 1);
    assert!(cache.sprite("ui_icons", "star").is_some());
}

#[test]
fn test_failed_fetch_can_be_retried_by_caller() {
    let mut cache = ui_icons_cache();
    cache.backend_mut().set_failing("atlases/icons", true);

    assert!(matches!(
        cache.acquire("ui_icons"),
        Err(AtlasError::AssetLoadFailure { .. })
    ));
    assert!(!cache.is_loaded("ui_icons"));
    assert_eq!(cache.backend().fetch_count("atlases/icons"), 1);

    cache.backend_mut().set_failing("atlases/icons", false);
    assert_eq!(cache.acquire("ui_icons").unwrap(), 1);
    assert_eq!(cache.backend().fetch_count("atlases/icons"), 2);
}

#[test]
fn test_reload_after_drain_fetches_again() {
    let mut cache = ui_icons_cache();

    cache.acquire("ui_icons").unwrap();
    let old_texture = representative_texture(&cache, "ui_icons").unwrap();
    cache.release("ui_icons");
    assert_eq!(cache.resolve_tag(&old_texture), None);

    cache.acquire("ui_icons").unwrap();
    let new_texture = representative_texture(&cache, "ui_icons").unwrap();
    assert_ne!(old_texture, new_texture);
    assert_eq!(cache.resolve_tag(&new_texture), Some("ui_icons"));
    assert_eq!(cache.backend().fetch_count("atlases/icons"), 2);
}

#[test]
fn test_ref_count_floor() {
    let mut cache = ui_icons_cache();

    for _ in 0..5 {
        assert_eq!(cache.release("ui_icons"), 0);
    }
    assert_eq!(cache.acquire("ui_icons").unwrap(), 1);
    for _ in 0..5 {
        assert_eq!(cache.release("ui_icons"), 0);
    }
    assert_eq!(cache.ref_count("ui_icons"), 0);
    assert_eq!(cache.stats().unloads, 1);
}

#[test]
fn test_loaded_observer_sees_queryable_atlas() {
    let mut cache = ui_icons_cache();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let sink = seen.clone();
    cache.on_loaded(move |event| {
        sink.lock()
            .unwrap()
            .push((event.tag.to_string(), event.sprite_count));
    });

    cache.acquire("ui_icons").unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![("ui_icons".to_string(), 2)]);
}

#[test]
fn test_observers_detach() {
    let mut cache = ui_icons_cache();
    let count = Arc::new(Mutex::new(0));

    let counter = count.clone();
    let id = cache.on_unloaded(move |_| *counter.lock().unwrap() += 1);

    cache.acquire("ui_icons").unwrap();
    cache.release("ui_icons");
    assert!(cache.unsubscribe_unloaded(id));
    assert!(!cache.unsubscribe_unloaded(id));

    cache.acquire("ui_icons").unwrap();
    cache.release("ui_icons");
    assert_eq!(*count.lock().unwrap(), 1);
}

/// Random acquire/release traffic across several atlases
#[test]
fn test_random_sequences_keep_indices_consistent() {
    let mut cache = three_atlas_cache();
    let events: Arc<Mutex<HashMap<String, (u32, u32)>>> = Arc::default();

    let sink = events.clone();
    cache.on_loaded(move |event| {
        sink.lock().unwrap().entry(event.tag.to_string()).or_default().0 += 1;
    });
    let sink = events.clone();
    cache.on_unloaded(move |event| {
        assert_eq!(event.ref_count, 0);
        sink.lock().unwrap().entry(event.tag.to_string()).or_default().1 += 1;
    });

    let mut rng = StdRng::seed_from_u64(0x5eed);
    let mut expected: HashMap<&str, u32> = HashMap::new();
    let mut textures: HashMap<&str, TextureId> = HashMap::new();

    for _ in 0..2_000 {
        let tag = TAGS[rng.gen_range(0..TAGS.len())];
        let count = expected.entry(tag).or_default();

        if rng.gen_bool(0.5) {
            assert_eq!(cache.acquire(tag).unwrap(), *count + 1);
            *count += 1;
        } else {
            *count = count.saturating_sub(1);
            assert_eq!(cache.release(tag), *count);
        }

        if let Some(texture) = representative_texture(&cache, tag) {
            textures.insert(tag, texture);
        }

        for tag in TAGS {
            let refs = expected.get(tag).copied().unwrap_or(0);
            assert_eq!(cache.ref_count(tag), refs);
            assert_eq!(cache.is_loaded(tag), refs > 0);

            // The last texture seen for a tag resolves exactly while it is referenced
            if let Some(texture) = textures.get(tag) {
                assert_eq!(cache.resolve_tag(texture) == Some(tag), refs > 0);
            }
        }
    }

    for (tag, (loads, unloads)) in events.lock().unwrap().iter() {
        assert!(
            *loads == *unloads || *loads == *unloads + 1,
            "{tag}: {loads} loads vs {unloads} unloads"
        );
    }

    let stats = cache.stats();
    assert_eq!(stats.info_pool.outstanding, stats.loaded_atlases);
    assert_eq!(
        stats.total_refs,
        expected.values().map(|&refs| u64::from(refs)).sum::<u64>()
    );
}

#[test]
fn test_init_from_descriptor_file() {
    init_logging();
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("atlas_descriptors.json");
    std::fs::write(
        &path,
        r#"{
            "Atlases": [
                { "AtlasID": 1, "AtlasTag": "ui_icons", "ResourcesPath": "atlases/icons",
                  "SpriteNames": ["gear", "star"] }
            ]
        }"#,
    )
    .unwrap();

    let backend = MemoryBackend::new().with_atlas("atlases/icons", ["gear", "star"]);
    let mut cache = AtlasCache::init(&CacheConfig::new(&path), backend).unwrap();

    assert_eq!(cache.descriptors().len(), 1);
    cache.acquire("ui_icons").unwrap();
    assert!(cache.sprite("ui_icons", "star").is_some());

    let backend = cache.shutdown();
    assert_eq!(backend.live_atlas_count(), 0);
}

#[test]
fn test_init_with_missing_descriptor_file() {
    let temp = tempfile::tempdir().unwrap();
    let config = CacheConfig::new(temp.path().join("absent.json"));

    let err = AtlasCache::init(&config, MemoryBackend::new()).unwrap_err();
    assert!(matches!(
        err,
        AtlasError::Config(DescriptorError::ConfigMissing(_))
    ));
}

#[test]
fn test_init_with_malformed_descriptor_file() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("atlas_descriptors.json");
    std::fs::write(&path, "{ \"atlases\": [ { \"tag\": ").unwrap();

    let err = AtlasCache::init(&CacheConfig::new(&path), MemoryBackend::new()).unwrap_err();
    assert!(matches!(err, AtlasError::Config(DescriptorError::ConfigParse(_))));
}
