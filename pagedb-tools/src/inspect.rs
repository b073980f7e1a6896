use std::path::PathBuf;

use clap::Parser;
use pagedb::{
    page::{free_space_of_class, PageType, SpaceMapRef, SPACE_CLASS_SIZES, SPACE_MAP_INTERVAL},
    page_store::PageStore,
    ErrorKind, Store, StoreOptions,
};

use crate::bench::{Error, Result};

#[derive(Parser, Debug, Clone)]
#[clap(about = "Print the layout of a store file")]
pub(crate) struct Args {
    /// Path of the store file.
    #[arg(long, required = true)]
    db: PathBuf,

    /// Also print the entry count and depth of every index.
    #[arg(long, default_value_t = false)]
    indexes: bool,
}

#[derive(Default)]
struct PageSummary {
    unallocated: u64,
    objects: u64,
    index_nodes: u64,
    unknown: u64,
    classes: [u64; SPACE_CLASS_SIZES.len()],
}

pub(crate) fn run(args: Args) -> Result<()> {
    if !args.db.exists() {
        return Err(Error::Argument(format!(
            "{} does not exist",
            args.db.display()
        )));
    }

    let pages = PageStore::open(&args.db)?;
    let count = pages.page_count();
    let summary = summarize(&pages, count)?;
    println!("File: {}", args.db.display());
    println!("Format version: {}", pages.format_version());
    println!("Pages: {count}");
    println!(
        "Page types: unallocated: {}, objects: {}, index nodes: {}, unknown: {}",
        summary.unallocated, summary.objects, summary.index_nodes, summary.unknown
    );
    println!("Free-space classes:");
    for (class, n) in summary.classes.iter().enumerate() {
        if *n > 0 {
            println!(
                "  class {:2} (>= {:4} bytes free): {} pages",
                class,
                free_space_of_class(class as u8),
                n
            );
        }
    }
    pages.close(false);

    let mut options = StoreOptions::default();
    options.create_if_missing = false;
    let store = match Store::open_with(&args.db, options) {
        Ok(store) => store,
        Err(err) if err.kind() == ErrorKind::StoreEmpty => {
            println!("No store context, indexes skipped");
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    };
    for name in store.index_names()? {
        if args.indexes {
            let (entries, depth) = store.get_index(&name)?.summary()?;
            println!("Index {name:?}: {entries} entries, depth {depth}");
        } else {
            println!("Index {name:?}");
        }
    }
    Ok(())
}

fn summarize(pages: &PageStore, count: u32) -> Result<PageSummary> {
    let mut summary = PageSummary::default();
    for map_number in (0..count).step_by(SPACE_MAP_INTERVAL as usize) {
        let map = pages.acquire(map_number)?;
        let data = map.read();
        let space_map = SpaceMapRef::new(map_number, &data);
        let last = space_map.last_page().min(count.saturating_sub(1));
        for number in space_map.first_page()..=last {
            if let Some(n) = space_map
                .class(number)
                .and_then(|class| summary.classes.get_mut(class as usize))
            {
                *n += 1;
            }
            let page = pages.acquire(number)?;
            match PageType::of(&page.read()) {
                Some(PageType::Unallocated) => summary.unallocated += 1,
                Some(PageType::Objects) => summary.objects += 1,
                Some(PageType::IndexNode) => summary.index_nodes += 1,
                None => summary.unknown += 1,
            };
        }
    }
    Ok(summary)
}
