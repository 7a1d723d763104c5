use anyhow::Result;

mod common;
use common::create_test_buffer_pool;

#[test]
fn test_new_page() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;

    let (page, page_id) = buffer_pool.new_page()?;
    {
        let page_guard = page.read();
        assert_eq!(page_guard.page_id, page_id);
        assert!(page_guard.data.iter().all(|&b| b == 0));
    }

    assert!(buffer_pool.unpin_page(page_id, false));
    Ok(())
}

#[test]
fn test_page_ids_are_consecutive() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;

    let (_, first) = buffer_pool.new_page()?;
    let (_, second) = buffer_pool.new_page()?;
    assert_eq!(second, first + 1);

    buffer_pool.unpin_page(first, false);
    buffer_pool.unpin_page(second, false);
    Ok(())
}

#[test]
fn test_fetch_resident_page() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;

    let (page, page_id) = buffer_pool.new_page()?;
    {
        let mut page_guard = page.write();
        page_guard.data[0..4].copy_from_slice(b"data");
    }
    buffer_pool.unpin_page(page_id, true);

    let fetched = buffer_pool.fetch_page(page_id)?;
    {
        let page_guard = fetched.read();
        assert_eq!(&page_guard.data[0..4], b"data");
    }
    buffer_pool.unpin_page(page_id, false);
    Ok(())
}

#[test]
fn test_modifications_survive_eviction() -> Result<()> {
    // Pool of 3 frames; writing 10 dirty pages forces evictions with
    // write-back, so every page must read back intact from disk
    let (buffer_pool, _temp_file) = create_test_buffer_pool(3)?;

    let mut page_ids = Vec::new();
    for i in 0..10u32 {
        let (page, page_id) = buffer_pool.new_page()?;
        {
            let mut page_guard = page.write();
            page_guard.data[0..4].copy_from_slice(&i.to_le_bytes());
        }
        buffer_pool.unpin_page(page_id, true);
        page_ids.push(page_id);
    }

    for (i, &page_id) in page_ids.iter().enumerate() {
        let page = buffer_pool.fetch_page(page_id)?;
        {
            let page_guard = page.read();
            assert_eq!(&page_guard.data[0..4], &(i as u32).to_le_bytes());
        }
        buffer_pool.unpin_page(page_id, false);
    }
    Ok(())
}

#[test]
fn test_exhausted_pool_then_unpin() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(3)?;

    let mut page_ids = Vec::new();
    for _ in 0..3 {
        let (_, page_id) = buffer_pool.new_page()?;
        page_ids.push(page_id);
    }

    // Every frame pinned: no new page, and no id is burned by the failure
    assert!(buffer_pool.new_page().is_err());

    assert!(buffer_pool.unpin_page(page_ids[0], false));
    let (_, page_id) = buffer_pool.new_page()?;
    assert_eq!(page_id, page_ids[2] + 1);

    buffer_pool.unpin_page(page_id, false);
    buffer_pool.unpin_page(page_ids[1], false);
    buffer_pool.unpin_page(page_ids[2], false);
    Ok(())
}

#[test]
fn test_unpin_semantics() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;

    let (_, page_id) = buffer_pool.new_page()?;
    assert!(buffer_pool.unpin_page(page_id, false));
    // Already at zero
    assert!(!buffer_pool.unpin_page(page_id, false));
    // Never resident
    assert!(!buffer_pool.unpin_page(9999, false));
    Ok(())
}

#[test]
fn test_pin_count_tracks_fetches() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;

    let (_, page_id) = buffer_pool.new_page()?;
    buffer_pool.fetch_page(page_id)?;

    // Two pins: two unpins succeed, the third fails
    assert!(buffer_pool.unpin_page(page_id, false));
    assert!(buffer_pool.unpin_page(page_id, false));
    assert!(!buffer_pool.unpin_page(page_id, false));
    Ok(())
}

#[test]
fn test_flush_page() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;

    let (page, page_id) = buffer_pool.new_page()?;
    {
        let mut page_guard = page.write();
        page_guard.data[100..105].copy_from_slice(b"flush");
    }
    buffer_pool.unpin_page(page_id, true);

    assert!(buffer_pool.flush_page(page_id)?);
    // Not resident: flush reports false
    assert!(!buffer_pool.flush_page(9999)?);

    let fetched = buffer_pool.fetch_page(page_id)?;
    {
        let page_guard = fetched.read();
        assert_eq!(&page_guard.data[100..105], b"flush");
    }
    buffer_pool.unpin_page(page_id, false);
    Ok(())
}

#[test]
fn test_flush_all_pages() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;

    let mut page_ids = Vec::new();
    for i in 0..5u32 {
        let (page, page_id) = buffer_pool.new_page()?;
        {
            let mut page_guard = page.write();
            page_guard.data[0..4].copy_from_slice(&i.to_le_bytes());
        }
        buffer_pool.unpin_page(page_id, true);
        page_ids.push(page_id);
    }

    buffer_pool.flush_all_pages()?;

    for (i, &page_id) in page_ids.iter().enumerate() {
        let page = buffer_pool.fetch_page(page_id)?;
        {
            let page_guard = page.read();
            assert_eq!(&page_guard.data[0..4], &(i as u32).to_le_bytes());
        }
        buffer_pool.unpin_page(page_id, false);
    }
    Ok(())
}

#[test]
fn test_delete_page() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;

    let (_, page_id) = buffer_pool.new_page()?;

    // Pinned: refuse
    assert!(!buffer_pool.delete_page(page_id)?);

    buffer_pool.unpin_page(page_id, false);
    assert!(buffer_pool.delete_page(page_id)?);

    // Not resident any more: trivially fine
    assert!(buffer_pool.delete_page(page_id)?);
    Ok(())
}
