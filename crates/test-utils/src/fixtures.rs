//! Sample DAP documents for tests.
//!
//! The COADS fixtures describe a small climatology grid (2 times, 3
//! latitudes, 4 longitudes) so matching binary payloads can be generated in
//! full.

/// Base URL the scripted transports serve the COADS fixtures under.
pub const COADS_URL: &str = "http://test.opendap.org/dap/coads.nc";

/// Base URL of the CTD sequence fixture.
pub const CTD_URL: &str = "http://test.opendap.org/dap/ctd";

/// Number of elements along each COADS axis.
pub mod coads {
    pub const TIME: usize = 2;
    pub const COADSY: usize = 3;
    pub const COADSX: usize = 4;

    /// Elements in the SST array.
    pub const SST_SIZE: usize = TIME * COADSY * COADSX;
}

/// DAP2 structure of the COADS grid.
pub const COADS_DDS: &str = "Dataset {
    Float64 COADSX[COADSX = 4];
    Float64 COADSY[COADSY = 3];
    Float64 TIME[TIME = 2];
    Grid {
      Array:
        Float32 SST[TIME = 2][COADSY = 3][COADSX = 4];
      Maps:
        Float64 TIME[TIME = 2];
        Float64 COADSY[COADSY = 3];
        Float64 COADSX[COADSX = 4];
    } SST;
} coads;";

/// DAP2 attributes of the COADS grid.
pub const COADS_DAS: &str = r#"Attributes {
    COADSX {
        String units "degrees_east";
        Float64 modulo 360.;
    }
    COADSY {
        String units "degrees_north";
    }
    TIME {
        String units "hour since 0000-01-01 00:00:00";
        Float64 actual_range 366.0, 1096.0;
    }
    SST {
        Float32 missing_value -1.0e+34;
        String long_name "SEA SURFACE TEMPERATURE";
        String units "Deg C";
    }
    NC_GLOBAL {
        String history "FERRET V4.30 (debug/no GUI) 15-Aug-96";
    }
    DODS_EXTRA {
        String Unlimited_Dimension "TIME";
    }
}"#;

/// DAP4 description of the same grid.
pub const COADS_DMR: &str = r#"<?xml version="1.0" encoding="ISO-8859-1"?>
<Dataset xmlns="http://xml.opendap.org/ns/DAP/4.0#" dapVersion="4.0" dmrVersion="1.0" name="coads">
    <Dimension name="TIME" size="2"/>
    <Dimension name="COADSY" size="3"/>
    <Dimension name="COADSX" size="4"/>
    <Float64 name="COADSX">
        <Dim name="/COADSX"/>
        <Attribute name="units" type="String">
            <Value>degrees_east</Value>
        </Attribute>
    </Float64>
    <Float64 name="COADSY">
        <Dim name="/COADSY"/>
    </Float64>
    <Float64 name="TIME">
        <Dim name="/TIME"/>
    </Float64>
    <Float32 name="SST">
        <Dim name="/TIME"/>
        <Dim name="/COADSY"/>
        <Dim name="/COADSX"/>
        <Attribute name="missing_value" type="Float32">
            <Value>-1.0e+34</Value>
        </Attribute>
        <Map name="/TIME"/>
        <Map name="/COADSY"/>
        <Map name="/COADSX"/>
    </Float32>
</Dataset>"#;

/// A DMR whose only variable is a single scalar.
pub fn scalar_dmr(dtype: &str, name: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<Dataset xmlns="http://xml.opendap.org/ns/DAP/4.0#" name="scalar">
    <{dtype} name="{name}"/>
</Dataset>"#
    )
}

/// A CTD cast: one sequence of station records.
pub const CTD_DDS: &str = "Dataset {
    Sequence {
        Int32 station;
        Float32 lat;
        Float32 lon;
        Float64 depth;
    } cast;
} ctd;";

/// Attributes of the CTD cast.
pub const CTD_DAS: &str = r#"Attributes {
    cast {
        depth {
            String units "m";
        }
    }
}"#;

/// Two records sharing a member name, for shorthand resolution.
pub const NESTED_DDS: &str = "Dataset {
    Structure {
        Int32 depth;
        Float32 temp;
    } a;
    Structure {
        Int32 depth;
        Float32 salinity;
    } b;
} nested;";

/// A DAP2 error body as servers send it with a 4xx status.
pub const ERROR_BODY: &str = r#"Error {
    code = 404;
    message = "Variable not found: nope";
};"#;
