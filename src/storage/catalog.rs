//! Append-only catalog of event records.
//!
//! Records are written one page at a time from [`LOG_DATA_BASE_ADDR`]
//! upwards. The persisted page counter is the only index: an event's id is
//! the number of complete events stored before it, so ids are dense and
//! start at zero after an erase.

use log::{debug, info, warn};
use thiserror_no_std::Error;

use super::{
    ControlFlag, ControlRegisterStore, EventRecord, LOG_DATA_BASE_ADDR, LOG_PAGE_CAPACITY,
    LogPage, PAGE_COUNT, PAGE_COUNTER_LOW_ADDR, PAGE_SIZE, PAGES_PER_EVENT, PagedStore,
    STORE_SIZE, StoreError,
};
use crate::sampling::SampleQueue;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogError {
    #[error("store access failed: {0}")]
    Store(StoreError),
    #[error("event log is full")]
    CapacityExhausted,
    #[error("no event with id {0}")]
    NotFound(u8),
    #[error("page index {0} is outside an event")]
    InvalidPageIndex(usize),
    #[error("page {page} of event {id} belongs to another event")]
    TornEvent { id: u8, page: usize },
}

impl From<StoreError> for CatalogError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

/// Event log layered over a [`PagedStore`].
pub struct EventCatalog<P> {
    store: P,
}

impl<P: PagedStore> EventCatalog<P> {
    pub fn new(store: P) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &P {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut P {
        &mut self.store
    }

    pub fn into_inner(self) -> P {
        self.store
    }

    /// Persisted number of event pages. Not validated against capacity.
    pub async fn page_count(&mut self) -> Result<u16, CatalogError> {
        let mut counter = [0u8; 2];
        self.store
            .read_page(PAGE_COUNTER_LOW_ADDR, &mut counter)
            .await?;
        Ok(u16::from_le_bytes(counter))
    }

    /// Number of complete events, truncated to a byte.
    pub async fn event_count(&mut self) -> Result<u8, CatalogError> {
        let pages = self.page_count().await?;
        Ok((pages / PAGES_PER_EVENT as u16) as u8)
    }

    /// Advance the page counter by one and persist it.
    pub async fn increment_page_count(&mut self) -> Result<u16, CatalogError> {
        let pages = self.page_count().await?;
        if pages >= LOG_PAGE_CAPACITY {
            warn!("Page counter at capacity ({}), not incrementing", pages);
            return Err(CatalogError::CapacityExhausted);
        }

        let next = pages + 1;
        self.store
            .write_page(PAGE_COUNTER_LOW_ADDR, &next.to_le_bytes())
            .await?;
        self.store.wait_for_completion().await?;
        Ok(next)
    }

    /// Write one page at the next free slot. Does not touch the counter.
    pub async fn append_page(&mut self, page: &[u8; PAGE_SIZE]) -> Result<u16, CatalogError> {
        let pages = self.page_count().await?;
        let addr = LOG_DATA_BASE_ADDR as u32 + pages as u32 * PAGE_SIZE as u32;
        if addr + PAGE_SIZE as u32 > STORE_SIZE as u32 {
            warn!("No room for a page at {:#06x}", addr);
            return Err(CatalogError::CapacityExhausted);
        }

        let addr = addr as u16;
        self.store.write_page(addr, page).await?;
        self.store.wait_for_completion().await?;
        debug!("Appended page {} at {:#06x}", pages, addr);
        Ok(addr)
    }

    /// Store one page and account for it in the counter.
    pub async fn append_event_record(&mut self, record: &LogPage) -> Result<u16, CatalogError> {
        let addr = self.append_page(&record.to_bytes()).await?;
        self.increment_page_count().await?;
        Ok(addr)
    }

    /// Store a complete event built from the current sample history.
    ///
    /// Nothing is written unless all pages fit. Returns the event's base
    /// address.
    pub async fn append_event(
        &mut self,
        id: u8,
        status: u8,
        timestamp: u16,
        queue: &SampleQueue,
    ) -> Result<u16, CatalogError> {
        let pages = self.page_count().await?;
        if pages as usize + PAGES_PER_EVENT > LOG_PAGE_CAPACITY as usize {
            warn!(
                "Event {} dropped: {} of {} pages used",
                id, pages, LOG_PAGE_CAPACITY
            );
            return Err(CatalogError::CapacityExhausted);
        }

        let mut base = None;
        for payload in queue.payloads() {
            let page = LogPage::new(id, status, timestamp, payload);
            let addr = self.append_event_record(&page).await?;
            base.get_or_insert(addr);
        }

        let base = base.unwrap_or(LOG_DATA_BASE_ADDR);
        info!(
            "Stored event {} (status {:#04x}, t={}s) at {:#06x}",
            id, status, timestamp, base
        );
        Ok(base)
    }

    /// Address of the first page whose header carries `id`.
    pub async fn find_event_address(&mut self, id: u8) -> Result<u16, CatalogError> {
        let mut addr = LOG_DATA_BASE_ADDR as usize;
        while addr + PAGE_SIZE <= STORE_SIZE {
            if self.store.read_byte(addr as u16).await? == id {
                return Ok(addr as u16);
            }
            addr += PAGE_SIZE;
        }
        Err(CatalogError::NotFound(id))
    }

    /// Ids at or past the event count were never written, whatever the
    /// page headers hold.
    async fn ensure_stored(&mut self, id: u8) -> Result<(), CatalogError> {
        let events = self.event_count().await?;
        if id >= events {
            debug!("Event {} requested, {} stored", id, events);
            return Err(CatalogError::NotFound(id));
        }
        Ok(())
    }

    /// One page of the event `id`.
    pub async fn read_event_page(
        &mut self,
        id: u8,
        page_index: usize,
    ) -> Result<LogPage, CatalogError> {
        if page_index >= PAGES_PER_EVENT {
            return Err(CatalogError::InvalidPageIndex(page_index));
        }

        self.ensure_stored(id).await?;
        let base = self.find_event_address(id).await?;
        let addr = base as usize + page_index * PAGE_SIZE;
        if addr + PAGE_SIZE > STORE_SIZE {
            return Err(CatalogError::TornEvent {
                id,
                page: page_index,
            });
        }

        let mut bytes = [0u8; PAGE_SIZE];
        self.store.read_page(addr as u16, &mut bytes).await?;
        let page = LogPage::from_bytes(&bytes);
        if page.id != id {
            return Err(CatalogError::TornEvent {
                id,
                page: page_index,
            });
        }
        Ok(page)
    }

    /// All pages of the event `id`.
    pub async fn read_event(&mut self, id: u8) -> Result<EventRecord, CatalogError> {
        self.ensure_stored(id).await?;
        let base = self.find_event_address(id).await?;
        if base as usize + PAGES_PER_EVENT * PAGE_SIZE > STORE_SIZE {
            return Err(CatalogError::TornEvent { id, page: 0 });
        }

        let mut pages = [LogPage::new(0, 0, 0, [0; super::PAYLOAD_SIZE]); PAGES_PER_EVENT];
        for (index, page) in pages.iter_mut().enumerate() {
            let mut bytes = [0u8; PAGE_SIZE];
            let addr = base + (index * PAGE_SIZE) as u16;
            self.store.read_page(addr, &mut bytes).await?;
            *page = LogPage::from_bytes(&bytes);
            if page.id != id {
                return Err(CatalogError::TornEvent { id, page: index });
            }
        }
        Ok(EventRecord { pages })
    }

    /// Zero the whole store, control page included, then mark the reset.
    pub async fn erase_all(&mut self) -> Result<(), CatalogError> {
        info!("Erasing {} pages", PAGE_COUNT);

        let zeros = [0u8; PAGE_SIZE];
        for page in 0..PAGE_COUNT {
            self.store
                .write_page((page * PAGE_SIZE) as u16, &zeros)
                .await?;
            self.store.wait_for_completion().await?;
        }

        self.store
            .set_flag(ControlFlag::ResetPerformed, true)
            .await?;
        info!("Erase complete");
        Ok(())
    }
}
