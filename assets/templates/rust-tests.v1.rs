{{PREAMBLE}}
use solution::*;

{{TESTS}}
