//! Walks the heap pages of the on-disk `pg_class` relation, extracting
//! `(oid, relfilenode, relname)` tuples into the relation-name cache.
//! PostgreSQL 9.x page layout only (the `HEAP_HASOID`
//! flag this relies on was removed in later-era changes; see DESIGN.md
//! for the version-targeting decision).

use std::fs::File;
use std::io::Read;

use camino::{Utf8Path, Utf8PathBuf};

use crate::cluster::ClusterContext;
use crate::error::PgClassError;
use crate::relmap::RelmapDecoder;
use crate::rn_cache::{RnCache, RnOrigin};

/// `RelationRelationId`: PostgreSQL's `pg_class` catalog OID. An invariant
/// of the PostgreSQL catalog, not configuration.
const PG_CLASS_OID: u32 = 1259;

const PG_PAGE_SIZE: usize = 8192;
const PAGE_HEADER_SIZE: usize = 24;
const LP_NORMAL: u8 = 1;
const HEAP_HASOID: u16 = 0x0008;
/// Offset of `FormData_pg_class.relfilenode` within the tuple's user data,
/// per the fixed PostgreSQL 9.x catalog layout (relname[64] + 4 Oid-sized
/// columns before it).
const RELFILENODE_OFFSET: usize = 80;
const NAMEDATALEN: usize = 64;

/// Computes the path to the `pg_class` relation file for the currently
/// discovered cluster/database.
pub fn pg_class_filepath(ctx: &ClusterContext, relmap: &RelmapDecoder) -> Result<Utf8PathBuf, PgClassError> {
    let cluster_path = ctx.cluster_path().ok_or(PgClassError::NoClusterYet)?;
    let db_oid = ctx.database_oid().ok_or(PgClassError::NoClusterYet)?;
    let filenode = relmap.oid_to_filenode(PG_CLASS_OID, false);
    Ok(cluster_path.join("base").join(db_oid.to_string()).join(filenode.to_string()))
}

/// Reads `path` page by page, adding every normal tuple's
/// `(oid, relfilenode, relname)` to `rn_cache`. Returns the number of
/// entries added.
pub fn load_rn_cache_from_pg_class(path: &Utf8Path, rn_cache: &mut RnCache) -> Result<usize, PgClassError> {
    let mut file = File::open(path).map_err(|source| PgClassError::Open {
        path: path.to_owned(),
        source,
    })?;

    let mut page = [0u8; PG_PAGE_SIZE];
    let mut offset: u64 = 0;
    let mut added = 0;

    loop {
        let n = file.read(&mut page).map_err(|source| PgClassError::Open {
            path: path.to_owned(),
            source,
        })?;

        if n < PAGE_HEADER_SIZE {
            // A short header read at EOF terminates cleanly.
            break;
        }
        if n != PG_PAGE_SIZE {
            return Err(PgClassError::PageTruncated {
                path: path.to_owned(),
                offset,
            });
        }

        added += decode_page(&page, path, offset, rn_cache)?;
        offset += PG_PAGE_SIZE as u64;
    }

    Ok(added)
}

fn decode_page(
    page: &[u8; PG_PAGE_SIZE],
    path: &Utf8Path,
    page_offset: u64,
    rn_cache: &mut RnCache,
) -> Result<usize, PgClassError> {
    let pd_lower = u16::from_le_bytes(page[12..14].try_into().unwrap()) as usize;
    if pd_lower < PAGE_HEADER_SIZE {
        // Tolerated: an empty or not-yet-initialized page, not an error.
        return Ok(0);
    }

    let n_pointers = (pd_lower - PAGE_HEADER_SIZE) / 4;
    let truncated = || PgClassError::PageTruncated {
        path: path.to_owned(),
        offset: page_offset,
    };
    let mut added = 0;

    for i in 0..n_pointers {
        let off = PAGE_HEADER_SIZE + i * 4;
        let word = u32::from_le_bytes(page[off..off + 4].try_into().unwrap());
        let lp_off = (word & 0x7FFF) as usize;
        let lp_flags = ((word >> 15) & 0x3) as u8;
        let lp_len = ((word >> 17) & 0x7FFF) as usize;

        if lp_flags != LP_NORMAL {
            // Dead, unused or redirected line pointers are normal heap
            // churn, not corruption.
            continue;
        }
        if lp_off < PAGE_HEADER_SIZE || lp_len == 0 || lp_off.checked_add(lp_len).map_or(true, |end| end > PG_PAGE_SIZE) {
            return Err(truncated());
        }

        let tuple = &page[lp_off..lp_off + lp_len];
        if tuple.len() < 19 {
            return Err(truncated());
        }
        let t_infomask = u16::from_le_bytes(tuple[16..18].try_into().unwrap());
        let t_hoff = tuple[18] as usize;
        if t_hoff > tuple.len() {
            return Err(truncated());
        }
        let data = &tuple[t_hoff..];

        let oid = if t_infomask & HEAP_HASOID != 0 {
            if t_hoff < 4 {
                return Err(truncated());
            }
            u32::from_le_bytes(tuple[t_hoff - 4..t_hoff].try_into().unwrap())
        } else {
            0
        };

        if data.len() < RELFILENODE_OFFSET + 4 {
            // A tuple too short to carry relfilenode isn't pg_class shaped;
            // skip rather than abort the whole page.
            continue;
        }

        let relname = parse_name(&data[..NAMEDATALEN]);
        if relname.is_empty() {
            continue;
        }
        let relfilenode =
            u32::from_le_bytes(data[RELFILENODE_OFFSET..RELFILENODE_OFFSET + 4].try_into().unwrap());

        rn_cache.add(RnOrigin::PgClass, oid, relfilenode, relname);
        added += 1;
    }

    Ok(added)
}

fn parse_name(slot: &[u8]) -> String {
    let nul = slot.iter().position(|&b| b == 0).unwrap_or(slot.len());
    String::from_utf8_lossy(&slot[..nul]).into_owned()
}
