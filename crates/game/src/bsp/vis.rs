use super::error::LoadError;

/// Decompressed potentially visible sets, one bit row per leaf.
///
/// Bit `n - 1` of a row stands for leaf `n`; leaf 0 is the solid outside
/// leaf and never appears in a row.
#[derive(Debug, Clone, Default)]
pub struct Pvs {
    row_bytes: usize,
    rows: Vec<Option<Box<[u8]>>>,
    has_data: bool,
}

impl Pvs {
    /// Expands the rows of leaves `0..visofs.len()` from the visibility lump.
    /// `visleafs` is the world model's leaf count (leaf 0 excluded).
    pub fn decompress(vis: &[u8], visofs: &[i32], visleafs: usize) -> Result<Self, LoadError> {
        let row_bytes = visleafs.div_ceil(8);
        let mut rows = Vec::with_capacity(visofs.len());
        let mut has_data = false;

        for (leaf, &offset) in visofs.iter().enumerate() {
            if offset < 0 || vis.is_empty() {
                rows.push(None);
                continue;
            }
            let row = decompress_row(vis, offset as usize, row_bytes).map_err(|reason| {
                LoadError::malformed(format!("visibility row of leaf {leaf}: {reason}"))
            })?;
            rows.push(Some(row));
            has_data = true;
        }

        Ok(Self {
            row_bytes,
            rows,
            has_data,
        })
    }

    pub fn has_data(&self) -> bool {
        self.has_data
    }

    pub fn row_bytes(&self) -> usize {
        self.row_bytes
    }

    pub fn row(&self, leaf: usize) -> Option<&[u8]> {
        self.rows.get(leaf)?.as_deref()
    }

    /// Whether `to` may be seen from `from`. A leaf always sees itself and
    /// the outside leaf sees everything. Without any vis data nothing else
    /// is visible.
    pub fn is_visible(&self, from: usize, to: usize) -> bool {
        if from == to || from == 0 {
            return true;
        }
        if !self.has_data || to == 0 {
            return false;
        }
        let bit = to - 1;
        self.row(from)
            .and_then(|row| row.get(bit >> 3))
            .is_some_and(|byte| byte & (1 << (bit & 7)) != 0)
    }
}

/// Zero bytes are followed by a run length of zero bytes; every other byte is
/// literal.
fn decompress_row(vis: &[u8], offset: usize, row_bytes: usize) -> Result<Box<[u8]>, String> {
    let mut out = Vec::with_capacity(row_bytes);
    let mut at = offset;

    while out.len() < row_bytes {
        let byte = *vis
            .get(at)
            .ok_or_else(|| format!("runs past the end of the lump at byte {at}"))?;
        if byte != 0 {
            out.push(byte);
            at += 1;
            continue;
        }

        let run = *vis
            .get(at + 1)
            .ok_or_else(|| format!("zero run at byte {at} has no length"))? as usize;
        at += 2;
        let run = run.min(row_bytes - out.len());
        out.resize(out.len() + run, 0);
    }

    Ok(out.into_boxed_slice())
}
