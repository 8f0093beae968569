use crate::simulation::error::Result;
use crate::simulation::table::Table;

/// Distance assumed for trips within a zone, in km.
pub const INTRAZONAL_DISTANCE: f64 = 0.5;

/// Zone geometry and attributes taken from the land use table. Distances are straight line
/// distances between zone centroids.
#[derive(Debug, Clone, Copy)]
pub struct Zones<'a> {
    land_use: &'a Table,
    x: &'a [f64],
    y: &'a [f64],
}

impl<'a> Zones<'a> {
    pub fn new(land_use: &'a Table) -> Result<Self> {
        Ok(Zones {
            land_use,
            x: land_use.floats("x")?,
            y: land_use.floats("y")?,
        })
    }

    pub fn ids(&self) -> &'a [i64] {
        self.land_use.index()
    }

    pub fn len(&self) -> usize {
        self.land_use.len()
    }

    pub fn is_empty(&self) -> bool {
        self.land_use.is_empty()
    }

    pub fn position(&self, zone: i64) -> Result<usize> {
        self.land_use.position(zone)
    }

    pub fn ints(&self, column: &str) -> Result<&'a [i64]> {
        self.land_use.ints(column)
    }

    pub fn floats(&self, column: &str) -> Result<&'a [f64]> {
        self.land_use.floats(column)
    }

    /// Distance between the zones at positions `o` and `d`.
    pub fn distance(&self, o: usize, d: usize) -> f64 {
        if o == d {
            INTRAZONAL_DISTANCE
        } else {
            (self.x[o] - self.x[d]).hypot(self.y[o] - self.y[d])
        }
    }

    pub fn distance_between(&self, orig: i64, dest: i64) -> Result<f64> {
        Ok(self.distance(self.position(orig)?, self.position(dest)?))
    }
}
