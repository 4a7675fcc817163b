/*!
# Spreadsheet Comparison Dashboard

A browser dashboard for comparing, cleaning and analysing spreadsheets, built in Rust.

## Overview

Users upload two or more spreadsheet files. Every file becomes an in-memory
table keyed by its file name, with the column names taken from the sheet's
third row. On those tables the dashboard offers:

- Comparison of two tables on a reference column, listing the rows whose
  values differ or that exist in one file only
- Column formatting (Uppercase, Lowercase, Titlecase, Strip Spaces)
- Formulas and analyses written as snippets in a small pipeline language
- Snippet suggestions generated by a chat-completion endpoint from a plain
  language request
- Download of any result as an `.xlsx` file

## Architecture

### Frontend Layer
- **Technologies**: HTML, CSS, JavaScript
- A single page served by the backend; it talks to the JSON API below

### Backend Layer
- **Technologies**: Rust, axum, tokio
- **Core Components**:
  - Table Loader - Reads xlsx/xls/ods/csv uploads with a fixed header row
  - Table Registry - Session-scoped tables keyed by file name
  - Comparison Engine - Outer join on a reference column with a match flag
  - Snippet Executor - Parser and interpreter for the pipeline language
  - Suggestion Generator - Prompt building, rate-limit retries, code block extraction
  - Exporter - Tables to xlsx and csv

### Session Layer
- One session per browser, identified by a cookie and held in memory for 24 hours
- No persistence: tables live only as long as their session

## Modules

- **cell**: Scalar cell values and their comparison rules
- **table**: Column-oriented table with previews and text rendering
- **loader**: Spreadsheet and CSV loading
- **registry**: Tables keyed by file name
- **compare**: Row alignment and mismatch views
- **format**: Column text formatting
- **snippet**: Pipeline language lexer, parser and interpreter
- **suggest**: Snippet suggestions from a completion endpoint
- **export**: XLSX and CSV export
- **config**: Settings from the environment
- **session**: Per-browser session store (web feature)
- **app**: Routing and handlers (web feature)

## REST API Endpoints

- `POST /api/upload` - Upload spreadsheet files (multipart)
- `GET /api/tables` - Loaded tables with previews
- `POST /api/compare` - Compare two tables
- `POST /api/format` - Format a column
- `POST /api/formula` - Run a snippet against one table
- `POST /api/suggest` - Ask for a snippet
- `POST /api/execute` - Run a snippet or the last suggestion
- `GET /api/export?filename=` - Download the last result
- `GET /api/tables/{name}/export` - Download a loaded table
*/

pub mod cell;
pub mod compare;
pub mod config;
pub mod error;
pub mod export;
pub mod format;
pub mod loader;
pub mod registry;
pub mod snippet;
pub mod suggest;
pub mod table;

#[cfg(feature = "web")]
pub mod app;
#[cfg(feature = "web")]
pub mod session;

pub use cell::CellValue;
pub use error::{DashboardError, Result};
pub use registry::TableRegistry;
pub use table::Table;
