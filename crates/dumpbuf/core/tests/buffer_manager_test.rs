// Dotlanth
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

use std::sync::Arc;
use std::thread;

use dumpbuf_core::policy::{self, AlwaysDump, BarrierDump, DumpPolicy, NeverDump, ValveDump};
use dumpbuf_core::{
    AllocationPolicy, BufferError, BufferManager, BufferObject, BytesStream, FileFormat, FileHolder, FixedMonitor, LoadingMode, ManagerConfig, NoAllocPolicy, SharedAllocationPolicy, ZeroedPolicy,
    default_policy,
};
use tempfile::TempDir;

fn setup() -> (TempDir, Arc<BufferManager>) {
    let dir = tempfile::tempdir().unwrap();
    let manager = BufferManager::new(ManagerConfig::with_dump_dir(dir.path())).unwrap();
    (dir, manager)
}

fn is_loaded(manager: &BufferManager, buffer: &BufferObject) -> bool {
    manager.buffer_infos().wait().unwrap()[&buffer.id()].loaded
}

#[test]
fn test_allocate() {
    let (_dir, manager) = setup();
    const SIZE: usize = 100_000;

    let buffer = BufferObject::with_manager(&manager).unwrap();
    assert!(buffer.is_empty());
    assert!(buffer.lock().unwrap().is_null());

    buffer.allocate(SIZE).unwrap();
    assert!(!buffer.is_empty());
    assert_eq!(buffer.size(), SIZE);
    assert!(!buffer.lock().unwrap().is_null());
    assert_eq!(buffer.lock_count(), 0);

    {
        let lock = buffer.lock().unwrap();
        assert_eq!(buffer.lock_count(), 1);
        for (i, byte) in lock.bytes_mut().iter_mut().enumerate() {
            *byte = (i % 256) as u8;
        }
    }
    {
        let lock = buffer.lock().unwrap();
        assert!(lock.bytes().iter().enumerate().all(|(i, &byte)| byte == (i % 256) as u8));
    }
    assert_eq!(buffer.lock_count(), 0);

    {
        let lock = buffer.lock().unwrap();
        assert_eq!(buffer.lock_count(), 1);
        let lock2 = buffer.lock().unwrap();
        assert_eq!(buffer.lock_count(), 2);
        let lock3 = lock2.clone();
        assert_eq!(buffer.lock_count(), 3);
        assert_eq!(lock.lock_count(), 3);
        drop(lock3);
    }
    assert_eq!(buffer.lock_count(), 0);

    buffer.destroy().unwrap();
    assert!(buffer.is_empty());
    assert!(buffer.lock().unwrap().is_null());

    let policy: SharedAllocationPolicy = Arc::new(ZeroedPolicy);
    buffer.allocate_with(SIZE, policy).unwrap();
    assert_eq!(buffer.size(), SIZE);
    buffer.lock().unwrap().bytes_mut().fill(7);
    assert!(buffer.lock().unwrap().bytes().iter().all(|&byte| byte == 7));

    buffer.destroy().unwrap();
    assert!(buffer.is_empty());
}

#[test]
fn test_memory_info() {
    let (_dir, manager) = setup();
    const SIZE: usize = 100_000;

    let bo = BufferObject::with_manager(&manager).unwrap();
    bo.allocate(SIZE).unwrap();
    let bo1 = BufferObject::with_manager(&manager).unwrap();
    {
        let _lock = bo1.lock().unwrap();
        assert!(manager.report().wait().unwrap().contains("nb Elem = 2"));
    }
    let bo2 = BufferObject::with_manager(&manager).unwrap();

    bo.reallocate(SIZE * 2).unwrap();
    assert_eq!(bo.size(), SIZE * 2);
    assert_eq!(bo.lock().unwrap().len(), SIZE * 2);

    bo.destroy().unwrap();
    bo1.allocate(SIZE).unwrap();
    bo2.allocate(SIZE).unwrap();
    bo.set_buffer(vec![1u8; SIZE], default_policy()).unwrap();

    let stats = manager.buffer_stats().wait().unwrap();
    assert_eq!(stats.total_managed, 3 * SIZE as u64);
    assert_eq!(stats.total_dumped, 0);

    for buffer in [&bo, &bo1, &bo2] {
        let _lock = buffer.lock().unwrap();
    }
    for buffer in [&bo, &bo1, &bo2] {
        buffer.destroy().unwrap();
    }
    assert_eq!(manager.buffer_stats().wait().unwrap().total_managed, 0);
}

#[test]
fn test_swap() {
    let (_dir, manager) = setup();
    let bo1 = BufferObject::with_manager(&manager).unwrap();
    let bo2 = BufferObject::with_manager(&manager).unwrap();
    let p1: SharedAllocationPolicy = Arc::new(ZeroedPolicy);
    let p2: SharedAllocationPolicy = Arc::new(ZeroedPolicy);

    bo1.allocate_with(4, p1.clone()).unwrap();
    bo2.allocate_with(8, p2.clone()).unwrap();
    bo1.lock().unwrap().bytes_mut().copy_from_slice(&1i32.to_le_bytes());
    bo2.lock().unwrap().bytes_mut().copy_from_slice(&2i64.to_le_bytes());

    bo1.swap(&bo2).unwrap();
    let map = manager.buffer_infos().wait().unwrap();

    assert_eq!(bo1.lock().unwrap().to_vec(), 2i64.to_le_bytes());
    assert!(Arc::ptr_eq(map[&bo1.id()].allocation_policy(), &p2));
    assert_eq!(map[&bo1.id()].size, 8);
    assert_eq!(bo1.size(), 8);

    assert_eq!(bo2.lock().unwrap().to_vec(), 1i32.to_le_bytes());
    assert!(Arc::ptr_eq(map[&bo2.id()].allocation_policy(), &p1));
    assert_eq!(map[&bo2.id()].size, 4);
    assert_eq!(bo2.size(), 4);
}

#[test]
fn test_swap_with_dumped_buffer() {
    let (_dir, manager) = setup();
    let bo1 = BufferObject::with_manager(&manager).unwrap();
    let bo2 = BufferObject::with_manager(&manager).unwrap();
    bo1.set_buffer(b"resident".to_vec(), default_policy()).unwrap();
    bo2.set_buffer(b"dumped".to_vec(), default_policy()).unwrap();
    assert!(manager.dump_buffer(bo2.id()).wait().unwrap());

    bo1.swap(&bo2).unwrap();
    assert!(!is_loaded(&manager, &bo1));
    assert!(is_loaded(&manager, &bo2));
    assert_eq!(bo1.lock().unwrap().to_vec(), b"dumped");
    assert_eq!(bo2.lock().unwrap().to_vec(), b"resident");
}

#[test]
fn test_swap_locked_buffer_with_dumped_buffer() {
    let (_dir, manager) = setup();
    let bo1 = BufferObject::with_manager(&manager).unwrap();
    let bo2 = BufferObject::with_manager(&manager).unwrap();
    bo1.set_buffer(b"aaaa".to_vec(), default_policy()).unwrap();
    bo2.set_buffer(b"bbbbbb".to_vec(), default_policy()).unwrap();
    assert!(manager.dump_buffer(bo2.id()).wait().unwrap());

    let held = bo1.lock().unwrap();
    bo1.swap(&bo2).unwrap();

    // The locked side stays resident and sees the swapped content
    assert!(is_loaded(&manager, &bo1));
    assert_eq!(bo1.size(), 6);
    assert_eq!(held.to_vec(), b"bbbbbb");
    let second = bo1.lock().unwrap();
    assert!(!second.is_null());
    assert_eq!(second.to_vec(), b"bbbbbb");
    drop((held, second));

    assert_eq!(bo2.lock().unwrap().to_vec(), b"aaaa");
}

#[test]
fn test_dump_restore() {
    let (_dir, manager) = setup();
    let bo = BufferObject::with_manager(&manager).unwrap();

    let stats = manager.buffer_stats().wait().unwrap();
    assert_eq!(stats.total_managed, 0);
    assert_eq!(stats.total_dumped, 0);

    bo.allocate(1).unwrap();
    let stats = manager.buffer_stats().wait().unwrap();
    assert_eq!(stats.total_managed, 1);
    assert_eq!(stats.total_dumped, 0);

    bo.lock().unwrap().bytes_mut()[0] = b'!';
    assert!(manager.dump_buffer(bo.id()).wait().unwrap());
    let stats = manager.buffer_stats().wait().unwrap();
    assert_eq!(stats.total_managed, 1);
    assert_eq!(stats.total_dumped, 1);

    let map = manager.buffer_infos().wait().unwrap();
    let info = &map[&bo.id()];
    assert_eq!(info.file_format, FileFormat::Raw);
    let path = info.fs_file.path().unwrap().to_path_buf();
    assert_eq!(std::fs::read(&path).unwrap(), b"!");
    drop(map);

    assert!(manager.restore_buffer(bo.id()).wait().unwrap());
    let stats = manager.buffer_stats().wait().unwrap();
    assert_eq!(stats.total_managed, 1);
    assert_eq!(stats.total_dumped, 0);
    assert_eq!(bo.lock().unwrap().bytes()[0], b'!');
    assert!(!path.exists());

    bo.destroy().unwrap();
    let stats = manager.buffer_stats().wait().unwrap();
    assert_eq!(stats.total_managed, 0);
    assert_eq!(stats.total_dumped, 0);
}

#[test]
fn test_lock_restores_dumped_buffer() {
    let (_dir, manager) = setup();
    let bo = BufferObject::with_manager(&manager).unwrap();
    bo.set_buffer(b"payload".to_vec(), default_policy()).unwrap();
    assert!(manager.dump_buffer(bo.id()).wait().unwrap());
    assert!(!manager.dump_buffer(bo.id()).wait().unwrap());

    let lock = bo.lock().unwrap();
    assert_eq!(lock.to_vec(), b"payload");
    assert!(is_loaded(&manager, &bo));
}

#[test]
fn test_destroy_dumped_buffer_removes_file() {
    let (_dir, manager) = setup();
    let bo = BufferObject::with_manager(&manager).unwrap();
    bo.allocate(16).unwrap();
    assert!(manager.dump_buffer(bo.id()).wait().unwrap());
    let path = manager.buffer_info(bo.id()).wait().unwrap().fs_file.path().unwrap().to_path_buf();
    assert!(path.exists());

    bo.destroy().unwrap();
    assert!(!path.exists());
    assert!(bo.is_empty());
    assert!(is_loaded(&manager, &bo));
}

#[test]
fn test_no_alloc_buffers_are_never_dumped() {
    let (_dir, manager) = setup();
    let bo = BufferObject::with_manager(&manager).unwrap();
    bo.set_buffer(vec![3u8; 32], Arc::new(NoAllocPolicy)).unwrap();

    assert!(!manager.dump_buffer(bo.id()).wait().unwrap());
    manager.set_dump_policy(Box::new(AlwaysDump)).wait().unwrap();
    assert!(is_loaded(&manager, &bo));
    assert!(matches!(bo.reallocate(64), Err(BufferError::AllocationUnsupported("no-alloc"))));
}

#[test]
fn test_allocation_failure_leaves_buffer_empty() {
    let (_dir, manager) = setup();
    let bo = BufferObject::with_manager(&manager).unwrap();

    assert!(matches!(bo.allocate(usize::MAX), Err(BufferError::Allocation { .. })));
    assert!(bo.is_empty());
    assert!(bo.lock().unwrap().is_null());

    bo.allocate(4).unwrap();
    assert_eq!(bo.size(), 4);
}

#[test]
fn test_stream_info() {
    let (_dir, manager) = setup();
    let bo = BufferObject::with_manager(&manager).unwrap();

    let info = bo.stream_info().unwrap();
    assert_eq!(info.size, 0);
    assert!(info.read_to_vec().unwrap().is_empty());

    bo.set_buffer(b"streamed".to_vec(), default_policy()).unwrap();
    let info = bo.stream_info().unwrap();
    assert_eq!(info.format, FileFormat::Other);
    assert!(info.fs_file.is_empty());
    assert_eq!(info.read_to_vec().unwrap(), b"streamed");

    assert!(manager.dump_buffer(bo.id()).wait().unwrap());
    let info = bo.stream_info().unwrap();
    assert_eq!(info.format, FileFormat::Raw);
    assert!(!info.user_stream);
    assert_eq!(info.read_to_vec().unwrap(), b"streamed");
    // Reading the dump file does not restore the buffer
    assert!(!is_loaded(&manager, &bo));
}

#[test]
fn test_istream_factory_loading_modes() {
    let (dir, manager) = setup();
    let path = dir.path().join("user.raw");
    std::fs::write(&path, b"from file").unwrap();
    let factory = Arc::new(dumpbuf_core::RawFileStream::new(FileHolder::new(&path, false)));

    assert_eq!(manager.loading_mode(), LoadingMode::Lazy);
    let lazy = BufferObject::with_manager(&manager).unwrap();
    lazy.set_istream_factory(factory.clone(), 9, FileHolder::new(&path, false), FileFormat::Other, default_policy()).unwrap();
    assert_eq!(lazy.size(), 9);
    assert!(!is_loaded(&manager, &lazy));

    let info = lazy.stream_info().unwrap();
    assert!(info.user_stream);
    assert_eq!(info.fs_file.path(), Some(path.as_path()));
    assert_eq!(info.read_to_vec().unwrap(), b"from file");

    assert_eq!(lazy.lock().unwrap().to_vec(), b"from file");
    assert!(is_loaded(&manager, &lazy));
    // User files are not owned by the manager
    assert!(path.exists());

    manager.set_loading_mode(LoadingMode::Direct);
    let direct = BufferObject::with_manager(&manager).unwrap();
    direct.set_istream_factory(Arc::new(BytesStream::new(b"direct".to_vec())), 6, FileHolder::default(), FileFormat::Other, default_policy()).unwrap();
    assert!(is_loaded(&manager, &direct));
    assert_eq!(direct.lock().unwrap().to_vec(), b"direct");
}

#[test]
fn test_always_dump_policy() {
    let (_dir, manager) = setup();
    let mut always = AlwaysDump;
    assert!(always.param_names().is_empty());
    assert!(!always.set_param("", ""));
    assert_eq!(always.param(""), None);

    // Not active yet, the buffer stays loaded
    let bo = BufferObject::with_manager(&manager).unwrap();
    bo.allocate(1).unwrap();
    assert!(is_loaded(&manager, &bo));

    // Active: the buffer is dumped right away
    manager.set_dump_policy(Box::new(always)).wait().unwrap();
    assert!(!is_loaded(&manager, &bo));

    // A lock restores the buffer, the unlock dumps it again
    bo.lock().unwrap().bytes_mut()[0] = b'!';
    assert!(!is_loaded(&manager, &bo));

    bo.reallocate(2).unwrap();
    assert_eq!(bo.lock().unwrap().to_vec(), b"!\0");
    assert!(!is_loaded(&manager, &bo));

    bo.destroy().unwrap();
}

#[test]
fn test_barrier_dump_policy() {
    let (_dir, manager) = setup();
    let mut barrier = BarrierDump::default();
    assert_eq!(barrier.param_names(), &["barrier"]);
    assert!(!barrier.set_param("banner", "nope"));
    assert!(!barrier.set_param("barrier", "-1B"));
    assert!(barrier.set_param("barrier", "1B"));
    manager.set_dump_policy(Box::new(barrier)).wait().unwrap();

    // The managed size is still acceptable
    let bo1 = BufferObject::with_manager(&manager).unwrap();
    bo1.allocate(1).unwrap();
    assert!(is_loaded(&manager, &bo1));

    // Locking does not change the loading status
    bo1.lock().unwrap().bytes_mut()[0] = b'!';
    assert!(is_loaded(&manager, &bo1));

    // The second allocation crosses the barrier, one of the buffers is dumped
    let bo2 = BufferObject::with_manager(&manager).unwrap();
    bo2.allocate(1).unwrap();
    assert!(is_loaded(&manager, &bo1) ^ is_loaded(&manager, &bo2));
    assert_eq!(manager.buffer_stats().wait().unwrap().total_dumped, 1);

    // Locking the dumped buffer brings it back, the other one goes out on unlock
    assert_eq!(bo1.lock().unwrap().to_vec(), b"!");
    assert!(is_loaded(&manager, &bo1) ^ is_loaded(&manager, &bo2));

    bo1.destroy().unwrap();
    bo2.destroy().unwrap();
    assert_eq!(manager.buffer_stats().wait().unwrap(), Default::default());
}

#[test]
fn test_barrier_survives_failed_allocations() {
    let (_dir, manager) = setup();
    manager.set_dump_policy(Box::new(BarrierDump::new(1024))).wait().unwrap();

    let bo1 = BufferObject::with_manager(&manager).unwrap();
    let bo2 = BufferObject::with_manager(&manager).unwrap();
    bo1.allocate(4).unwrap();

    // Neither request may take the worker down or stay accounted
    assert!(matches!(bo2.allocate(usize::MAX), Err(BufferError::Allocation { .. })));
    assert!(matches!(bo2.allocate(1 << 62), Err(BufferError::Allocation { .. })));
    assert!(bo2.is_empty());

    drop(bo1.lock().unwrap());
    assert!(is_loaded(&manager, &bo1));
    let stats = manager.buffer_stats().wait().unwrap();
    assert_eq!(stats.total_managed, 4);
    assert_eq!(stats.total_dumped, 0);

    bo2.allocate(8).unwrap();
    assert!(is_loaded(&manager, &bo1) && is_loaded(&manager, &bo2));
}

#[test]
fn test_never_dump_policy() {
    let (_dir, manager) = setup();
    let mut never = NeverDump;
    assert!(never.param_names().is_empty());
    assert!(!never.set_param("", ""));
    assert_eq!(never.param(""), None);

    let bo = BufferObject::with_manager(&manager).unwrap();
    bo.allocate(1).unwrap();
    assert!(is_loaded(&manager, &bo));

    manager.set_dump_policy(Box::new(never)).wait().unwrap();
    assert!(is_loaded(&manager, &bo));

    bo.lock().unwrap().bytes_mut()[0] = b'!';
    assert!(is_loaded(&manager, &bo));

    bo.reallocate(2).unwrap();
    assert!(is_loaded(&manager, &bo));
    bo.destroy().unwrap();
}

#[test]
fn test_valve_dump_policy() {
    let (_dir, manager) = setup();
    let monitor = FixedMonitor::new(1024 * 1024, 4 * 1024 * 1024);
    let mut valve = ValveDump::with_monitor(monitor.clone());
    assert_eq!(valve.param_names().len(), 2);
    assert!(!valve.set_param("min_free_memes", "nope"));
    assert!(!valve.set_param("hysteric_offset", "nope"));
    assert!(!valve.set_param("min_free_mem", "-1B"));
    assert!(!valve.set_param("hysteresis_offset", "-1B"));
    assert!(valve.set_param("min_free_mem", "2B"));
    assert!(valve.set_param("hysteresis_offset", "1B"));
    manager.set_dump_policy(Box::new(valve)).wait().unwrap();

    // Allocations while free memory is still acceptable
    {
        monitor.set_free(5);
        let bo1 = BufferObject::with_manager(&manager).unwrap();
        bo1.allocate(1).unwrap();
        monitor.set_free(4);
        assert!(is_loaded(&manager, &bo1));

        // Free memory did not change, neither does the loading status
        bo1.lock().unwrap().bytes_mut()[0] = b'!';
        assert!(is_loaded(&manager, &bo1));

        let bo2 = BufferObject::with_manager(&manager).unwrap();
        bo2.allocate(1).unwrap();
        monitor.set_free(3);
        assert!(is_loaded(&manager, &bo1) && is_loaded(&manager, &bo2));

        bo1.destroy().unwrap();
        bo2.destroy().unwrap();
    }

    // Minimal free memory crossed for external reasons
    {
        monitor.set_free(1024 * 1024);
        let bo = BufferObject::with_manager(&manager).unwrap();
        bo.allocate(1).unwrap();
        assert!(is_loaded(&manager, &bo));

        // The policy does not watch memory actively
        monitor.set_free(0);
        assert!(is_loaded(&manager, &bo));

        // Operating on the buffer lets the policy notice
        drop(bo.lock().unwrap());
        assert!(!is_loaded(&manager, &bo));
        bo.destroy().unwrap();
    }
}

#[test]
fn test_valve_dumps_least_recently_used_first() {
    let (_dir, manager) = setup();
    let monitor = FixedMonitor::new(1024, 1024);
    let mut valve = ValveDump::with_monitor(monitor.clone());
    assert!(valve.set_param("min_free_mem", "10B"));
    manager.set_dump_policy(Box::new(valve)).wait().unwrap();

    let buffers: Vec<_> = (0..3)
        .map(|_| {
            let buffer = BufferObject::with_manager(&manager).unwrap();
            buffer.allocate(4).unwrap();
            buffer
        })
        .collect();
    // Touch the first buffer, the second one becomes the least recently used
    drop(buffers[0].lock().unwrap());

    // 10 - 6 = 4 bytes must be released: one buffer
    monitor.set_free(6);
    drop(buffers[2].lock().unwrap());
    assert!(is_loaded(&manager, &buffers[0]));
    assert!(!is_loaded(&manager, &buffers[1]));
    assert!(is_loaded(&manager, &buffers[2]));
}

#[test]
fn test_valve_hysteresis_on_allocation() {
    let (_dir, manager) = setup();
    let monitor = FixedMonitor::new(1024, 1024);
    let mut valve = ValveDump::with_monitor(monitor.clone());
    assert!(valve.set_param("min_free_mem", "10B"));
    assert!(valve.set_param("hysteresis_offset", "4B"));
    manager.set_dump_policy(Box::new(valve)).wait().unwrap();

    let buffers: Vec<_> = (0..4)
        .map(|_| {
            let buffer = BufferObject::with_manager(&manager).unwrap();
            buffer.allocate(4).unwrap();
            buffer
        })
        .collect();
    assert_eq!(manager.buffer_stats().wait().unwrap().total_dumped, 0);

    // 12 free bytes minus the 4 requested ones is under 10: 10 + 4 + 4 - 12 = 6
    // bytes must go, which takes the two oldest buffers
    monitor.set_free(12);
    let fifth = BufferObject::with_manager(&manager).unwrap();
    fifth.allocate(4).unwrap();

    let stats = manager.buffer_stats().wait().unwrap();
    assert_eq!(stats.total_managed, 20);
    assert_eq!(stats.total_dumped, 8);
    assert!(!is_loaded(&manager, &buffers[0]));
    assert!(!is_loaded(&manager, &buffers[1]));
    assert!(is_loaded(&manager, &buffers[2]));
    assert!(is_loaded(&manager, &buffers[3]));
    assert!(is_loaded(&manager, &fifth));
}

#[test]
fn test_valve_counts_reallocation_growth() {
    let (_dir, manager) = setup();
    let monitor = FixedMonitor::new(1024, 1024);
    let mut valve = ValveDump::with_monitor(monitor.clone());
    assert!(valve.set_param("min_free_mem", "10B"));
    manager.set_dump_policy(Box::new(valve)).wait().unwrap();

    let bo1 = BufferObject::with_manager(&manager).unwrap();
    let bo2 = BufferObject::with_manager(&manager).unwrap();
    bo1.allocate(4).unwrap();
    bo2.allocate(4).unwrap();
    monitor.set_free(13);

    // Growing by one byte keeps 12 bytes free
    bo2.reallocate(5).unwrap();
    assert!(is_loaded(&manager, &bo1) && is_loaded(&manager, &bo2));

    // Shrinking never triggers a dump
    bo2.reallocate(4).unwrap();
    assert!(is_loaded(&manager, &bo1) && is_loaded(&manager, &bo2));

    // Growing by four bytes leaves 9: the least recently used buffer goes
    bo2.reallocate(8).unwrap();
    assert!(!is_loaded(&manager, &bo1));
    assert!(is_loaded(&manager, &bo2));
    assert_eq!(bo2.size(), 8);
    assert_eq!(manager.buffer_stats().wait().unwrap().total_dumped, 4);
}

#[test]
fn test_locked_buffers_survive_eviction() {
    let (_dir, manager) = setup();
    let bo1 = BufferObject::with_manager(&manager).unwrap();
    let bo2 = BufferObject::with_manager(&manager).unwrap();
    bo1.allocate(8).unwrap();
    bo2.allocate(8).unwrap();

    let lock = bo1.lock().unwrap();
    manager.set_dump_policy(policy::create("always").unwrap()).wait().unwrap();
    assert!(is_loaded(&manager, &bo1));
    assert!(!is_loaded(&manager, &bo2));

    drop(lock);
    assert!(!is_loaded(&manager, &bo1));
}

#[test]
fn test_policy_from_config() {
    let dir = tempfile::tempdir().unwrap();
    let config = ManagerConfig::from_json_str(&format!(
        r#"{{ "dump_dir": {:?}, "policy": {{ "name": "barrier", "params": {{ "barrier": "4B" }} }} }}"#,
        dir.path().join("dumps")
    ))
    .unwrap();
    let manager = BufferManager::new(config).unwrap();
    assert!(manager.dump_dir().is_dir());
    assert_eq!(manager.dump_policy_name().wait().unwrap(), "barrier");
    assert_eq!(manager.policy_param("barrier").wait().unwrap().as_deref(), Some("4 B"));

    let buffers: Vec<_> = (0..3)
        .map(|_| {
            let buffer = BufferObject::with_manager(&manager).unwrap();
            buffer.allocate(2).unwrap();
            buffer
        })
        .collect();
    let stats = manager.buffer_stats().wait().unwrap();
    assert_eq!(stats.total_managed, 6);
    assert_eq!(stats.resident(), 4);
    assert!(!is_loaded(&manager, &buffers[0]));
}

#[test]
fn test_invalid_config_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = ManagerConfig::with_dump_dir(dir.path());
    config.policy.name = "sometimes".to_string();
    assert!(matches!(BufferManager::new(config), Err(BufferError::UnknownPolicy(_))));
}

#[test]
fn test_global_manager() {
    let first = BufferManager::global().unwrap();
    let second = BufferManager::global().unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    let buffer = BufferObject::new().unwrap();
    assert!(Arc::ptr_eq(buffer.manager(), &first));
    buffer.allocate(3).unwrap();
    assert_eq!(buffer.lock().unwrap().len(), 3);
}

#[test]
fn test_concurrent_clients_with_small_barrier() {
    let (_dir, manager) = setup();
    manager.set_dump_policy(Box::new(BarrierDump::new(4 * 1024))).wait().unwrap();

    let handles: Vec<_> = (0..4u8)
        .map(|t| {
            let manager = manager.clone();
            thread::spawn(move || {
                let buffers: Vec<_> = (0..8u8)
                    .map(|i| {
                        let buffer = BufferObject::with_manager(&manager).unwrap();
                        buffer.allocate(1024).unwrap();
                        buffer.lock().unwrap().bytes_mut().fill(t * 16 + i);
                        buffer
                    })
                    .collect();

                for _ in 0..3 {
                    for (i, buffer) in buffers.iter().enumerate() {
                        let lock = buffer.lock().unwrap();
                        assert!(lock.bytes().iter().all(|&byte| byte == t * 16 + i as u8));
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let stats = manager.buffer_stats().wait().unwrap();
    assert_eq!(stats.total_managed, 0);
    assert!(manager.buffer_infos().wait().unwrap().is_empty());
}

#[test]
fn test_custom_allocation_policy() {
    #[derive(Debug)]
    struct Filled(u8);

    impl AllocationPolicy for Filled {
        fn allocate(&self, size: usize) -> dumpbuf_core::BufferResult<Vec<u8>> {
            Ok(vec![self.0; size])
        }

        fn reallocate(&self, buffer: &mut Vec<u8>, new_size: usize) -> dumpbuf_core::BufferResult<()> {
            buffer.resize(new_size, self.0);
            Ok(())
        }

        fn name(&self) -> &'static str {
            "filled"
        }
    }

    let (_dir, manager) = setup();
    let bo = BufferObject::with_manager(&manager).unwrap();
    bo.allocate_with(2, Arc::new(Filled(9))).unwrap();
    bo.reallocate(3).unwrap();
    assert_eq!(bo.lock().unwrap().to_vec(), vec![9, 9, 9]);
    assert!(manager.report().wait().unwrap().contains("filled"));
}

#[tokio::test]
async fn test_manager_operations_can_be_awaited() {
    let (_dir, manager) = setup();
    let buffer = {
        let manager = manager.clone();
        tokio::task::spawn_blocking(move || BufferObject::with_manager(&manager)).await.unwrap().unwrap()
    };

    manager.allocate_buffer(buffer.id(), 16, default_policy()).await.unwrap();
    {
        let lock = manager.lock_buffer(buffer.id()).await.unwrap();
        lock.bytes_mut().fill(1);
    }
    assert!(manager.dump_buffer(buffer.id()).await.unwrap());
    assert_eq!(manager.buffer_stats().await.unwrap().total_dumped, 16);

    let lock = manager.lock_buffer(buffer.id()).await.unwrap();
    assert_eq!(lock.to_vec(), vec![1u8; 16]);
    drop(lock);

    // Stream info blocks, it runs off the async threads
    let id = buffer.id();
    let stream_manager = manager.clone();
    let content = tokio::task::spawn_blocking(move || stream_manager.stream_info(id)?.read_to_vec()).await.unwrap().unwrap();
    assert_eq!(content, vec![1u8; 16]);

    manager.set_dump_policy(policy::create("never").unwrap()).await.unwrap();
    assert_eq!(manager.dump_policy_name().await.unwrap(), "never");
    assert!(!manager.set_policy_param("barrier", "1B").await.unwrap());
}
